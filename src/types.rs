//! Data model shared by the REST and realtime halves of the transporter.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind of mutation carried by a [`ChangeEvent`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One mutation to one record, tagged with the resource path it belongs to.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChangeEvent {
    #[serde(rename = "ref")]
    pub reference: String,
    pub data: JsonValue,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
}

impl ChangeEvent {
    pub fn added(reference: impl Into<String>, data: JsonValue) -> Self {
        Self {
            reference: reference.into(),
            data,
            change_type: ChangeType::Added,
        }
    }

    /// Record identity used for document-level fan-out. Ids may arrive as
    /// JSON strings or numbers depending on the backend.
    pub fn record_id(&self) -> Option<String> {
        match self.data.get("id") {
            Some(JsonValue::String(id)) => Some(id.clone()),
            Some(JsonValue::Number(id)) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Cursor-based paging metadata. `n` is a caller-owned counter; the
/// transport initializes it to 0 and never mutates it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Paging {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub n: u32,
}

/// Server-reported error carried inside a stream item.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct QueryError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QueryStreamData {
    pub changes: Vec<ChangeEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

/// The unit emitted to a query's consumer: a change batch, or an error that
/// leaves the stream open.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QueryStreamItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryStreamData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryStreamItem {
    pub fn from_changes(changes: Vec<ChangeEvent>, paging: Option<Paging>) -> Self {
        Self {
            data: Some(QueryStreamData { changes, paging }),
            error: None,
        }
    }

    pub fn from_error(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

/// Comparison applied by a [`Filter`]. The wire encoding of each operator is
/// owned by the filter encoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    InArray,
    NotInArray,
    Contains,
    Like,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: JsonValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Sort {
    Asc,
    #[default]
    Desc,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::Asc => "asc",
            Sort::Desc => "desc",
        }
    }
}

/// Options for one logical query. `limit` defaults to 20 and is always sent;
/// `order_by`/`sort` travel together; a `cursor` marks a paged view, which
/// also disables push attachment for the query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub cursor: Option<String>,
    pub limit: u32,
    pub order_by: Option<String>,
    pub sort: Sort,
    pub filters: Vec<Filter>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 20,
            order_by: None,
            sort: Sort::default(),
            filters: Vec::new(),
        }
    }
}

impl QueryOptions {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_order_by(mut self, field: impl Into<String>, sort: Sort) -> Self {
        self.order_by = Some(field.into());
        self.sort = sort;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Push-channel lifecycle signal observed by queries to gate baseline pulls.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Open,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}
