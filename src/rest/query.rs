//! Per-query orchestration: baseline pulls merged with push events.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};

use crate::config::{HeaderProvider, UrlFactory};
use crate::error::{TransportError, TransportResult};
use crate::platform::runtime::spawn_detached;
use crate::realtime::RealtimeConnection;
use crate::rest::{
    ensure_success, join_url, read_json_body, resolve_headers, LOGGER,
};
use crate::types::{
    ChangeEvent, ConnectionState, Paging, QueryError, QueryStreamItem,
};

/// Everything one live query needs to run: the HTTP side of the pull path,
/// the optional push channel, and the encoded request parameters.
pub(crate) struct QueryTransport {
    pub client: Client,
    pub base_url: UrlFactory,
    pub headers: Option<HeaderProvider>,
    pub realtime: Option<RealtimeConnection>,
    pub reference: String,
    pub params: Vec<(String, String)>,
    /// Queries with a pagination cursor are partial views and never attach
    /// to the push channel; per-record events cannot keep a page live.
    pub paged: bool,
    pub query_id: u64,
    pub active_queries: Arc<Mutex<HashSet<u64>>>,
}

impl QueryTransport {
    /// Spawns the pull and push tasks and hands the merged stream to the
    /// consumer. Dropping the returned [`QueryStream`] is the only
    /// cancellation signal: it ends the pull triggers, detaches the topic
    /// subscription, and releases the query identity.
    pub fn activate(self) -> QueryStream {
        let (item_tx, item_rx) = async_channel::unbounded();
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        // Never written to; dropping the stream closes it, which is how the
        // push task learns the consumer went away without waiting for the
        // next change event.
        let (detach_tx, mut detach_rx) = mpsc::unbounded_channel::<()>();

        let attached = self.should_attach();
        if attached {
            self.active_queries.lock().unwrap().insert(self.query_id);
            let realtime = self.realtime.clone().expect("attachment requires realtime");
            let reference = self.reference.clone();
            let push_tx = item_tx.clone();
            spawn_detached(async move {
                let mut listener = realtime.listen(&reference);
                loop {
                    tokio::select! {
                        change = listener.recv() => match change {
                            Some(change) => {
                                let item = QueryStreamItem::from_changes(vec![change], None);
                                if push_tx.send(item).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        _ = detach_rx.recv() => break,
                    }
                }
            });
        }

        let guard = QueryGuard {
            active_queries: self.active_queries.clone(),
            query_id: attached.then_some(self.query_id),
        };

        let puller = PullContext {
            client: self.client,
            base_url: self.base_url,
            headers: self.headers,
            realtime: self.realtime,
            reference: self.reference,
            params: self.params,
            attached,
        };
        spawn_detached(async move {
            puller.run(item_tx, reload_rx).await;
        });

        QueryStream {
            receiver: item_rx,
            reload_tx,
            _detach_tx: detach_tx,
            _guard: guard,
        }
    }

    fn should_attach(&self) -> bool {
        if self.realtime.is_none() || self.paged {
            return false;
        }
        // Duplicate attachment guard for the same logical query.
        !self.active_queries.lock().unwrap().contains(&self.query_id)
    }
}

/// Consumer handle for one live query: a stream of [`QueryStreamItem`] plus
/// the `reload` control.
pub struct QueryStream {
    receiver: async_channel::Receiver<QueryStreamItem>,
    reload_tx: mpsc::UnboundedSender<()>,
    _detach_tx: mpsc::UnboundedSender<()>,
    _guard: QueryGuard,
}

impl QueryStream {
    /// Next item in arrival order; baseline and push items interleave with
    /// no deduplication. Returns `None` once the stream is fully detached.
    pub async fn next(&mut self) -> Option<QueryStreamItem> {
        self.receiver.recv().await.ok()
    }

    /// Requests a fresh baseline pull. Dropped (not queued) while the push
    /// channel is configured but not open, since reconnection triggers a
    /// pull on its own.
    pub fn reload(&self) {
        let _ = self.reload_tx.send(());
    }
}

struct QueryGuard {
    active_queries: Arc<Mutex<HashSet<u64>>>,
    query_id: Option<u64>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        if let Some(query_id) = self.query_id {
            self.active_queries.lock().unwrap().remove(&query_id);
        }
    }
}

struct PullContext {
    client: Client,
    base_url: UrlFactory,
    headers: Option<HeaderProvider>,
    realtime: Option<RealtimeConnection>,
    reference: String,
    params: Vec<(String, String)>,
    attached: bool,
}

impl PullContext {
    /// Trigger loop for baseline pulls: initial activation, every
    /// reconnect completion, and explicit reloads while the channel is
    /// open. With realtime disabled the state is pinned to `Open`, so the
    /// initial pull is immediate and reloads always pass.
    async fn run(
        &self,
        item_tx: async_channel::Sender<QueryStreamItem>,
        mut reload_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let (mut status, _keepalive) = match &self.realtime {
            Some(connection) => (connection.status(), None),
            None => {
                let (tx, rx) = watch::channel(ConnectionState::Open);
                (rx, Some(tx))
            }
        };

        let mut pending_pull = true;
        loop {
            if pending_pull && status.borrow().is_open() {
                pending_pull = false;
                let item = self.fetch_baseline().await;
                if item_tx.send(item).await.is_err() {
                    return;
                }
            }

            tokio::select! {
                changed = status.changed() => {
                    match changed {
                        Ok(()) => {
                            if status.borrow().is_open() {
                                pending_pull = true;
                            }
                        }
                        Err(_) => return,
                    }
                }
                reload = reload_rx.recv() => {
                    match reload {
                        Some(()) => {
                            if status.borrow().is_open() {
                                pending_pull = true;
                            }
                            // Otherwise filtered out: the pull that fires on
                            // reconnect supersedes it.
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn fetch_baseline(&self) -> QueryStreamItem {
        match self.request().await {
            Ok(body) => self.normalize(body),
            Err(err) => {
                LOGGER.warn(format!(
                    "baseline pull for `{}` failed: {err}",
                    self.reference
                ));
                QueryStreamItem::from_error(error_payload(&err))
            }
        }
    }

    async fn request(&self) -> TransportResult<JsonValue> {
        let url = join_url(&self.base_url, &self.reference).await?;
        let session_id = self
            .realtime
            .as_ref()
            .map(|connection| connection.session_id().to_owned());
        let headers = resolve_headers(&self.headers, session_id.as_deref()).await?;

        let response = self
            .client
            .get(url)
            .headers(headers)
            .query(&self.params)
            .send()
            .await
            .map_err(|err| {
                crate::error::remote_error(format!(
                    "baseline request to `{}` failed: {err}",
                    self.reference
                ))
            })?;

        let status = response.status();
        let body = read_json_body(response).await?;
        if body.get("error").is_none() {
            ensure_success(status, &self.reference)?;
        }
        Ok(body)
    }

    /// Normalizes a baseline response body into one stream item.
    ///
    /// Shape detection is duck-typed for wire compatibility: an optional
    /// `data` envelope is unwrapped, then a payload with an `items` array is
    /// a collection page and anything else is a single record. A document
    /// schema that itself contains an `items` field is misclassified; the
    /// wire contract needs an explicit discriminator before this can change.
    fn normalize(&self, body: JsonValue) -> QueryStreamItem {
        if let Some(error) = body.get("error") {
            return QueryStreamItem::from_error(decode_error(error));
        }

        if self.attached {
            if let Some(token) = body.get("realtime_token").and_then(JsonValue::as_str) {
                if let Some(connection) = &self.realtime {
                    connection.subscribe(token);
                }
            }
        }

        let payload = match body {
            JsonValue::Object(ref object) if object.contains_key("data") => {
                object.get("data").cloned().unwrap_or(JsonValue::Null)
            }
            other => other,
        };

        if let Some(items) = payload.get("items").and_then(JsonValue::as_array) {
            let changes = items
                .iter()
                .map(|item| ChangeEvent::added(self.reference.clone(), item.clone()))
                .collect();
            let cursor = payload
                .get("paging")
                .and_then(|paging| paging.get("cursor"))
                .and_then(JsonValue::as_str)
                .map(str::to_owned);
            return QueryStreamItem::from_changes(changes, Some(Paging { cursor, n: 0 }));
        }

        QueryStreamItem::from_changes(
            vec![ChangeEvent::added(self.reference.clone(), payload)],
            Some(Paging { cursor: None, n: 0 }),
        )
    }
}

fn error_payload(err: &TransportError) -> QueryError {
    QueryError {
        code: Some(err.code_str().to_owned()),
        message: Some(err.message().to_owned()),
        data: None,
    }
}

fn decode_error(error: &JsonValue) -> QueryError {
    serde_json::from_value(error.clone()).unwrap_or_else(|_| QueryError {
        code: None,
        message: Some(error.to_string()),
        data: None,
    })
}
