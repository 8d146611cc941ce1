//! REST surface of the transporter: CRUD calls, named remote actions, and
//! live queries combining baseline pulls with the push channel.

pub mod filters;
mod query;

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value as JsonValue;
use url::Url;

use crate::config::{HeaderProvider, RestTransporterConfig, UrlFactory};
use crate::error::{invalid_argument, remote_error, TransportResult};
use crate::logger::Logger;
use crate::realtime::RealtimeConnection;
use crate::types::QueryOptions;

pub use query::QueryStream;

pub(crate) static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@livequery/transporter/rest"));

/// Highest HTTP status still considered a success by the wire contract.
const MAX_SUCCESS_STATUS: u16 = 205;

/// Client facade for one backend. Owns the optional push channel and the
/// set of live query identities, and issues all HTTP traffic.
pub struct RestTransporter {
    client: Client,
    base_url: UrlFactory,
    headers: Option<HeaderProvider>,
    realtime: Option<RealtimeConnection>,
    active_queries: Arc<Mutex<HashSet<u64>>>,
}

impl RestTransporter {
    pub fn new(config: RestTransporterConfig) -> Self {
        let realtime = match (&config.websocket_url, config.realtime) {
            (Some(factory), true) => Some(RealtimeConnection::with_timing(
                factory.clone(),
                config.reconnect_delay,
                config.unsubscribe_grace,
            )),
            _ => None,
        };

        Self {
            client: Client::new(),
            base_url: config.base_url,
            headers: config.headers,
            realtime,
            active_queries: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The push channel, when realtime is enabled for this transporter.
    pub fn realtime_connection(&self) -> Option<&RealtimeConnection> {
        self.realtime.as_ref()
    }

    /// Opens a live query on `reference`: one baseline pull per trigger
    /// (activation, reconnect, `reload`) merged with push events for the
    /// same reference. Filter encoding happens here, before any I/O.
    pub fn query(
        &self,
        query_id: u64,
        reference: &str,
        options: QueryOptions,
    ) -> TransportResult<QueryStream> {
        let params = filters::encode_query(&options)?;
        let transport = query::QueryTransport {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            headers: self.headers.clone(),
            realtime: self.realtime.clone(),
            reference: reference.to_owned(),
            params,
            paged: options.cursor.is_some(),
            query_id,
            active_queries: self.active_queries.clone(),
        };
        Ok(transport.activate())
    }

    pub async fn get(&self, reference: &str) -> TransportResult<JsonValue> {
        self.call(Method::GET, reference, &[], None).await
    }

    pub async fn add(&self, reference: &str, data: &JsonValue) -> TransportResult<JsonValue> {
        self.call(Method::POST, reference, &[], Some(data)).await
    }

    pub async fn update(&self, reference: &str, data: &JsonValue) -> TransportResult<JsonValue> {
        self.call(Method::PATCH, reference, &[], Some(data)).await
    }

    pub async fn put(&self, reference: &str, data: &JsonValue) -> TransportResult<JsonValue> {
        self.call(Method::PUT, reference, &[], Some(data)).await
    }

    pub async fn remove(&self, reference: &str) -> TransportResult<JsonValue> {
        self.call(Method::DELETE, reference, &[], None).await
    }

    /// Invokes the named remote action `POST {reference}/~{name}` with a
    /// query and a payload.
    pub async fn trigger(
        &self,
        reference: &str,
        name: &str,
        query: &[(String, String)],
        payload: &JsonValue,
    ) -> TransportResult<JsonValue> {
        let path = format!("{reference}/~{name}");
        self.call(Method::POST, &path, query, Some(payload)).await
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        payload: Option<&JsonValue>,
    ) -> TransportResult<JsonValue> {
        let url = join_url(&self.base_url, path).await?;
        let session_id = self.realtime.as_ref().map(|conn| conn.session_id().to_owned());
        let headers = resolve_headers(&self.headers, session_id.as_deref()).await?;

        let mut request = self.client.request(method, url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|err| remote_error(format!("request to `{path}` failed: {err}")))?;
        let status = response.status();
        let body = read_json_body(response).await?;

        if let Some(error) = body.get("error") {
            return Err(remote_error(format!(
                "server reported error for `{path}`: {error}"
            )));
        }
        ensure_success(status, path)?;
        Ok(body)
    }
}

pub(crate) async fn join_url(base_url: &UrlFactory, path: &str) -> TransportResult<Url> {
    let base = (base_url)().await;
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|err| invalid_argument(format!("invalid request url `{joined}`: {err}")))
}

pub(crate) async fn resolve_headers(
    provider: &Option<HeaderProvider>,
    session_id: Option<&str>,
) -> TransportResult<HeaderMap> {
    let mut map = HeaderMap::new();
    if let Some(provider) = provider {
        for (key, value) in (provider)().await {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|err| invalid_argument(format!("invalid header name `{key}`: {err}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|err| invalid_argument(format!("invalid header value for `{key}`: {err}")))?;
            map.insert(name, value);
        }
    }
    if let Some(session_id) = session_id {
        let value = HeaderValue::from_str(session_id)
            .map_err(|err| invalid_argument(format!("invalid socket_id header: {err}")))?;
        map.insert(HeaderName::from_static("socket_id"), value);
    }
    Ok(map)
}

pub(crate) async fn read_json_body(response: reqwest::Response) -> TransportResult<JsonValue> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| remote_error(format!("failed to read response body: {err}")))?;
    if bytes.is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(&bytes)
        .map_err(|err| remote_error(format!("response is not valid JSON: {err}")))
}

pub(crate) fn ensure_success(status: StatusCode, path: &str) -> TransportResult<()> {
    if status.as_u16() <= MAX_SUCCESS_STATUS {
        Ok(())
    } else {
        Err(remote_error(format!(
            "request to `{path}` failed with status {status}"
        )))
    }
}
