use std::future::Future;
use std::time::Duration;

/// Spawns an async task that runs in the background for the rest of the
/// process lifetime (or until it completes on its own).
///
/// Uses the ambient tokio runtime when one exists; otherwise falls back to a
/// lazily started single-threaded runtime so the transporter also works from
/// synchronous host applications.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use std::sync::LazyLock;
    use tokio::runtime::{Builder, Handle};

    // Dedicated thread driving a single-threaded runtime; only started if a
    // caller ever reaches the fallback path.
    static BACKGROUND_HANDLE: LazyLock<Handle> = LazyLock::new(|| {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build background tokio runtime");
        let handle = runtime.handle().clone();
        std::thread::spawn(move || runtime.block_on(std::future::pending::<()>()));
        handle
    });

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else {
        BACKGROUND_HANDLE.spawn(future);
    }
}

/// Asynchronously waits for the provided duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}
