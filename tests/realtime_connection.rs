mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use livequery_rest_transporter::config::UrlFactory;
use livequery_rest_transporter::realtime::RealtimeConnection;
use livequery_rest_transporter::types::ConnectionState;
use serde_json::json;
use support::PushServer;

const RECONNECT: Duration = Duration::from_millis(50);
const GRACE: Duration = Duration::from_millis(100);

/// URL factory whose target can be swapped while the connect loop runs;
/// pointing it at a dead port first keeps the connection down on demand.
fn switchable_target(initial: &str) -> (Arc<Mutex<String>>, UrlFactory) {
    let target = Arc::new(Mutex::new(initial.to_owned()));
    let factory_target = target.clone();
    let factory: UrlFactory = Arc::new(move || {
        let url = factory_target.lock().unwrap().clone();
        Box::pin(async move { url })
    });
    (target, factory)
}

const DEAD_URL: &str = "ws://127.0.0.1:9/";

#[tokio::test(flavor = "multi_thread")]
async fn start_handshake_then_buffered_messages_in_order() {
    let (target, factory) = switchable_target(DEAD_URL);
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);

    // Issued while disconnected: must be queued, then replayed after start.
    connection.subscribe("tok-1");
    connection.subscribe("tok-2");

    let mut server = PushServer::start().await;
    *target.lock().unwrap() = server.url().to_owned();

    let frame = server.recv_frame().await;
    assert_eq!(frame["event"], "start");
    assert_eq!(frame["data"]["id"], connection.session_id());

    let frame = server.recv_frame().await;
    assert_eq!(frame["event"], "subscribe");
    assert_eq!(frame["data"]["realtime_token"], "tok-1");

    let frame = server.recv_frame().await;
    assert_eq!(frame["data"]["realtime_token"], "tok-2");
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_replays_current_epoch_and_resets_the_buffer() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);

    assert_eq!(server.recv_frame().await["event"], "start");

    // Issued while open: sent immediately and recorded for replay.
    connection.subscribe("tok-3");
    assert_eq!(server.recv_frame().await["data"]["realtime_token"], "tok-3");

    server.drop_connection();

    // Second epoch: start handshake, then the replay of everything issued
    // since the first epoch began.
    assert_eq!(server.recv_frame().await["event"], "start");
    assert_eq!(server.recv_frame().await["data"]["realtime_token"], "tok-3");

    // Third epoch: the replayed buffer was reset, so only the handshake.
    server.drop_connection();
    assert_eq!(server.recv_frame().await["event"], "start");
    assert!(server.try_recv_frame(Duration::from_millis(300)).await.is_none());
    assert_eq!(server.connection_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn each_reconnect_cycle_waits_for_the_fixed_delay() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let reconnect = Duration::from_millis(200);
    let _connection = RealtimeConnection::with_timing(factory, reconnect, GRACE);

    assert_eq!(server.recv_frame().await["event"], "start");
    let dropped_at = std::time::Instant::now();
    server.drop_connection();
    assert_eq!(server.recv_frame().await["event"], "start");
    assert!(dropped_at.elapsed() >= reconnect);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_transitions_mark_reconnects() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);
    let mut status = connection.status();

    assert_eq!(server.recv_frame().await["event"], "start");
    while *status.borrow_and_update() != ConnectionState::Open {
        status.changed().await.unwrap();
    }

    server.drop_connection();
    status.changed().await.unwrap();
    assert_eq!(*status.borrow(), ConnectionState::Disconnected);

    status.changed().await.unwrap();
    assert_eq!(*status.borrow(), ConnectionState::Open);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_frames_fan_out_to_collection_and_document_listeners() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);

    let mut collection = connection.listen("posts");
    let mut document = connection.listen("posts/3");
    assert_eq!(server.recv_frame().await["event"], "start");

    server.push(json!({
        "event": "sync",
        "data": {"changes": [{"ref": "posts", "data": {"id": "3", "title": "x"}, "type": "modified"}]}
    }));

    let change = collection.recv().await.unwrap();
    assert_eq!(change.reference, "posts");

    let change = document.recv().await.unwrap();
    assert_eq!(change.reference, "posts/3");
    assert_eq!(change.data["title"], "x");
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_is_debounced_and_sent_once() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);
    assert_eq!(server.recv_frame().await["event"], "start");

    // Several concurrent attachments, detached one by one.
    let first = connection.listen("posts");
    let second = connection.listen("posts");
    let third = connection.listen("posts");

    drop(first);
    drop(second);
    assert!(server.try_recv_frame(GRACE * 3).await.is_none());

    drop(third);
    let frame = server.recv_frame().await;
    assert_eq!(frame["event"], "unsubscribe");
    assert_eq!(frame["data"]["ref"], "posts");
    assert!(server.try_recv_frame(GRACE * 3).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn reattaching_within_the_grace_window_cancels_the_unsubscribe() {
    let mut server = PushServer::start().await;
    let (_, factory) = switchable_target(server.url());
    let connection = RealtimeConnection::with_timing(factory, RECONNECT, GRACE);
    assert_eq!(server.recv_frame().await["event"], "start");

    let listener = connection.listen("posts");
    drop(listener);
    let _replacement = connection.listen("posts");

    assert!(server.try_recv_frame(GRACE * 3).await.is_none());
}
