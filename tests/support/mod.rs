//! In-process WebSocket push server used by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct PushServer {
    url: String,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: broadcast::Sender<String>,
    disconnect: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
}

impl PushServer {
    /// Binds a local listener and serves one websocket client at a time,
    /// accepting again after each drop so reconnects land on the same
    /// address.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind push server");
        let addr = listener.local_addr().expect("push server address");
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel::<String>(32);
        let (disconnect, _) = broadcast::channel::<()>(8);
        let connections = Arc::new(AtomicUsize::new(0));

        let push_tx = outbound.clone();
        let drop_tx = disconnect.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws) = accept_async(socket).await else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let (mut sink, mut reader) = ws.split();
                let mut push_rx = push_tx.subscribe();
                let mut drop_rx = drop_tx.subscribe();
                loop {
                    tokio::select! {
                        frame = reader.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(value) = serde_json::from_str(&text) {
                                    let _ = inbound_tx.send(value);
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        frame = push_rx.recv() => {
                            if let Ok(text) = frame {
                                if sink.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        _ = drop_rx.recv() => {
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            inbound,
            outbound,
            disconnect,
            connections,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame received from the client, parsed as JSON.
    pub async fn recv_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("push server stopped")
    }

    /// Like `recv_frame`, but returns `None` when nothing arrives within
    /// `wait`. Used to assert the absence of traffic.
    pub async fn try_recv_frame(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.inbound.recv()).await.ok()?
    }

    /// Sends a frame to the currently connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.outbound.send(frame.to_string());
    }

    /// Closes the current connection; the server keeps accepting.
    pub fn drop_connection(&self) {
        let _ = self.disconnect.send(());
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
