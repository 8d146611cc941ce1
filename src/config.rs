//! Configuration surface consumed by the transporter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

/// Asynchronous factory for an endpoint URL. Evaluated on every use so the
/// host application can rotate endpoints without rebuilding the transporter.
pub type UrlFactory = Arc<dyn Fn() -> BoxFuture<'static, String> + Send + Sync>;

/// Asynchronous provider of request headers, typically bridging the host's
/// authentication layer. The transporter passes the returned headers through
/// untouched.
pub type HeaderProvider =
    Arc<dyn Fn() -> BoxFuture<'static, HashMap<String, String>> + Send + Sync>;

/// Wraps a fixed URL into a [`UrlFactory`].
pub fn static_url(url: impl Into<String>) -> UrlFactory {
    let url = url.into();
    Arc::new(move || {
        let url = url.clone();
        Box::pin(async move { url })
    })
}

#[derive(Clone)]
pub struct RestTransporterConfig {
    pub base_url: UrlFactory,
    pub websocket_url: Option<UrlFactory>,
    pub headers: Option<HeaderProvider>,
    /// Disabling realtime degrades the transporter to pull-only operation:
    /// baseline pulls still function, push attachment is skipped.
    pub realtime: bool,
    pub reconnect_delay: Duration,
    pub unsubscribe_grace: Duration,
}

impl RestTransporterConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: static_url(base_url),
            websocket_url: None,
            headers: None,
            realtime: false,
            reconnect_delay: Duration::from_millis(1000),
            unsubscribe_grace: Duration::from_millis(2000),
        }
    }

    pub fn with_base_url_factory(factory: UrlFactory) -> Self {
        Self {
            base_url: factory,
            websocket_url: None,
            headers: None,
            realtime: false,
            reconnect_delay: Duration::from_millis(1000),
            unsubscribe_grace: Duration::from_millis(2000),
        }
    }

    /// Enables realtime push over the given websocket endpoint.
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(static_url(url));
        self.realtime = true;
        self
    }

    pub fn websocket_url_factory(mut self, factory: UrlFactory) -> Self {
        self.websocket_url = Some(factory);
        self.realtime = true;
        self
    }

    pub fn headers(mut self, provider: HeaderProvider) -> Self {
        self.headers = Some(provider);
        self
    }

    pub fn realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn unsubscribe_grace(mut self, grace: Duration) -> Self {
        self.unsubscribe_grace = grace;
        self
    }
}
