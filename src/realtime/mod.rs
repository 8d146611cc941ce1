//! Push-channel connection management.
//!
//! One [`RealtimeConnection`] per transporter owns the single logical
//! websocket to the backend. It reconnects forever with a fixed delay,
//! replays buffered control messages after every `start` handshake, and
//! fans inbound `sync` events out to reference-counted topics that queries
//! subscribe to through [`RealtimeConnection::listen`].
//!
//! Connection errors never leave this module; they only drive retry timing.
//! Queries observe recovery through the [`ConnectionState`] watch channel
//! and react with fresh baseline pulls.

mod topics;

use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::config::UrlFactory;
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_detached};
use crate::types::{ChangeEvent, ConnectionState};

use topics::TopicRegistry;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@livequery/transporter/realtime"));

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_UNSUBSCRIBE_GRACE: Duration = Duration::from_millis(2000);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Control frames sent to the server. The wire shape is symmetric with
/// inbound frames: `{"event": ..., "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub(crate) enum ControlMessage {
    Start { id: String },
    Subscribe { realtime_token: String },
    Unsubscribe {
        #[serde(rename = "ref")]
        reference: String,
    },
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: JsonValue,
}

#[derive(Debug, Deserialize)]
struct SyncPayload {
    #[serde(default)]
    changes: Vec<ChangeEvent>,
}

/// Control messages accumulated since the last successful connection, plus
/// the writer for the current epoch when one is open. Every issued message
/// lands in the buffer so the next epoch can replay everything issued since
/// this one began; when a writer is present it is also sent immediately.
struct Outbound {
    buffer: Vec<ControlMessage>,
    writer: Option<mpsc::UnboundedSender<String>>,
}

struct ConnectionShared {
    session_id: String,
    topics: Mutex<TopicRegistry>,
    outbound: Mutex<Outbound>,
    status: watch::Sender<ConnectionState>,
    unsubscribe_grace: Duration,
}

/// Owns the push channel for one transporter instance. Created once and
/// alive for the process lifetime; there is no teardown API.
#[derive(Clone)]
pub struct RealtimeConnection {
    shared: Arc<ConnectionShared>,
}

impl RealtimeConnection {
    pub fn new(websocket_url: UrlFactory) -> Self {
        Self::with_timing(
            websocket_url,
            DEFAULT_RECONNECT_DELAY,
            DEFAULT_UNSUBSCRIBE_GRACE,
        )
    }

    /// Like [`RealtimeConnection::new`] with explicit reconnect delay and
    /// unsubscribe debounce, mainly for hosts with unusual network
    /// characteristics (and for tests).
    pub fn with_timing(
        websocket_url: UrlFactory,
        reconnect_delay: Duration,
        unsubscribe_grace: Duration,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(ConnectionShared {
            session_id: new_session_id(),
            topics: Mutex::new(TopicRegistry::default()),
            outbound: Mutex::new(Outbound {
                buffer: Vec::new(),
                writer: None,
            }),
            status,
            unsubscribe_grace,
        });

        let loop_shared = shared.clone();
        spawn_detached(async move {
            run(loop_shared, websocket_url, reconnect_delay).await;
        });

        Self { shared }
    }

    /// Session identifier generated once per connection instance. Sent in
    /// the `start` handshake and used by the REST side as the `socket_id`
    /// header to correlate HTTP calls with the live session.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Watch channel over the push-channel lifecycle. Each transition to
    /// `Open` after the first is a reconnect-completed notification.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.status.subscribe()
    }

    /// Registers interest in `reference` and returns a multicast stream of
    /// change events for it. Dropping the listener schedules, after the
    /// grace delay, an `unsubscribe` control message if the topic is still
    /// idle, debouncing rapid detach/reattach cycles.
    pub fn listen(&self, reference: &str) -> TopicListener {
        let receiver = self
            .shared
            .topics
            .lock()
            .unwrap()
            .attach(reference);
        TopicListener {
            receiver,
            _guard: ListenGuard {
                shared: self.shared.clone(),
                reference: reference.to_owned(),
            },
        }
    }

    /// Enqueues a `subscribe` control message carrying a realtime token
    /// issued by a prior baseline pull.
    pub fn subscribe(&self, realtime_token: impl Into<String>) {
        send_control(
            &self.shared,
            ControlMessage::Subscribe {
                realtime_token: realtime_token.into(),
            },
        );
    }
}

/// Multicast stream of change events for one reference.
pub struct TopicListener {
    receiver: broadcast::Receiver<ChangeEvent>,
    _guard: ListenGuard,
}

impl TopicListener {
    /// Receives the next change event. Returns `None` once the topic is
    /// gone; slow consumers skip lagged events rather than erroring, since
    /// the next baseline pull recovers whatever was missed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    LOGGER.warn(format!("topic listener lagged, skipped {skipped} events"));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct ListenGuard {
    shared: Arc<ConnectionShared>,
    reference: String,
}

impl Drop for ListenGuard {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        let reference = std::mem::take(&mut self.reference);
        shared.topics.lock().unwrap().detach(&reference);

        let grace = shared.unsubscribe_grace;
        spawn_detached(async move {
            sleep(grace).await;
            let became_idle = shared.topics.lock().unwrap().remove_if_idle(&reference);
            if became_idle {
                send_control(&shared, ControlMessage::Unsubscribe { reference });
            }
        });
    }
}

fn send_control(shared: &ConnectionShared, message: ControlMessage) {
    let mut outbound = shared.outbound.lock().unwrap();
    outbound.buffer.push(message.clone());
    if let Some(writer) = &outbound.writer {
        match encode_control(&message) {
            Ok(text) => {
                // Writer-task failure means the epoch is ending; the
                // message stays buffered for the next replay.
                let _ = writer.send(text);
            }
            Err(err) => LOGGER.warn(format!("failed to encode control message: {err}")),
        }
    }
}

fn encode_control(message: &ControlMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

async fn run(shared: Arc<ConnectionShared>, websocket_url: UrlFactory, reconnect_delay: Duration) {
    let mut first_connection = true;
    loop {
        let url = (websocket_url)().await;
        match connect_async(&url).await {
            Ok((stream, _response)) => {
                if first_connection {
                    LOGGER.info(format!(
                        "push channel connected (session {})",
                        shared.session_id
                    ));
                } else {
                    LOGGER.info("push channel reconnected");
                }
                first_connection = false;
                run_epoch(&shared, stream).await;
                shared.status.send_replace(ConnectionState::Disconnected);
                LOGGER.debug(format!(
                    "push channel dropped, reconnecting in {}ms",
                    reconnect_delay.as_millis()
                ));
            }
            Err(err) => {
                LOGGER.debug(format!("push channel connect failed: {err}"));
            }
        }
        sleep(reconnect_delay).await;
    }
}

/// Drives one connection epoch: handshake, buffer replay, then inbound
/// dispatch until the socket drops.
async fn run_epoch(shared: &Arc<ConnectionShared>, stream: WsStream) {
    let (mut sink, mut reader) = stream.split();

    // Queue the `start` handshake and the replay of the previous epoch's
    // buffer ahead of anything issued concurrently, then install the writer
    // so send_control() reaches the socket directly. All under the outbound
    // lock so replay order is exact.
    let mut writer_rx = {
        let mut outbound = shared.outbound.lock().unwrap();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let start = ControlMessage::Start {
            id: shared.session_id.clone(),
        };
        match encode_control(&start) {
            Ok(text) => {
                let _ = writer_tx.send(text);
            }
            Err(err) => LOGGER.warn(format!("failed to encode start handshake: {err}")),
        }

        for message in std::mem::take(&mut outbound.buffer) {
            match encode_control(&message) {
                Ok(text) => {
                    let _ = writer_tx.send(text);
                }
                Err(err) => LOGGER.warn(format!("failed to encode buffered message: {err}")),
            }
        }

        outbound.writer = Some(writer_tx);
        writer_rx
    };

    shared.status.send_replace(ConnectionState::Open);

    let writer_task = tokio::spawn(async move {
        while let Some(text) = writer_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(payload)) => dispatch_frame(shared, &payload),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(payload) => dispatch_frame(shared, &payload),
                Err(_) => LOGGER.warn("received non-UTF8 binary push frame; dropping"),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    shared.outbound.lock().unwrap().writer = None;
    writer_task.abort();
}

fn dispatch_frame(shared: &ConnectionShared, payload: &str) {
    let frame: InboundFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(err) => {
            LOGGER.warn(format!("failed to decode push frame: {err}"));
            return;
        }
    };

    match frame.event.as_str() {
        "sync" => handle_sync(shared, frame.data),
        other => LOGGER.debug(format!("unhandled push event '{other}'")),
    }
}

fn handle_sync(shared: &ConnectionShared, data: JsonValue) {
    let payload: SyncPayload = match serde_json::from_value(data) {
        Ok(payload) => payload,
        Err(err) => {
            LOGGER.warn(format!("malformed sync payload: {err}"));
            return;
        }
    };

    let topics = shared.topics.lock().unwrap();
    for change in &payload.changes {
        topics.publish(change);
    }
}

/// Random session identifier in UUID-v4 format.
fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
