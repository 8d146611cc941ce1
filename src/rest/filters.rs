//! Query-option encoding into flat transport parameters.

use serde_json::Value as JsonValue;

use crate::error::{encoding_error, TransportResult};
use crate::types::{FilterOperator, QueryOptions};

impl FilterOperator {
    /// Bracketed operator code, or `None` for plain equality which encodes
    /// as the bare field name.
    fn code(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Equal => None,
            FilterOperator::NotEqual => Some("ne"),
            FilterOperator::LessThan => Some("lt"),
            FilterOperator::LessOrEqual => Some("lte"),
            FilterOperator::GreaterThan => Some("gt"),
            FilterOperator::GreaterOrEqual => Some("gte"),
            FilterOperator::InArray => Some("in-array"),
            FilterOperator::NotInArray => Some("not-in-array"),
            FilterOperator::Contains => Some("contains"),
            FilterOperator::Like => Some("like"),
        }
    }
}

/// Translates query options into flat key/value parameters.
///
/// `_limit` is always present; `_cursor` only when set; `_order_by`/`_sort`
/// travel together and only when an ordering field is set. An empty filter
/// list contributes no parameters.
pub fn encode_query(options: &QueryOptions) -> TransportResult<Vec<(String, String)>> {
    let mut params = Vec::with_capacity(options.filters.len() + 3);

    for filter in &options.filters {
        let key = match filter.operator.code() {
            None => filter.field.clone(),
            Some(code) => format!("{}[{}]", filter.field, code),
        };
        params.push((key, encode_value(&filter.field, &filter.value)?));
    }

    params.push(("_limit".to_owned(), options.limit.to_string()));
    if let Some(cursor) = &options.cursor {
        params.push(("_cursor".to_owned(), cursor.clone()));
    }
    if let Some(order_by) = &options.order_by {
        params.push(("_order_by".to_owned(), order_by.clone()));
        params.push(("_sort".to_owned(), options.sort.as_str().to_owned()));
    }

    Ok(params)
}

/// Scalars pass through as plain text; objects and arrays are serialized to
/// JSON since the transport parameter space is flat text.
fn encode_value(field: &str, value: &JsonValue) -> TransportResult<String> {
    match value {
        JsonValue::String(text) => Ok(text.clone()),
        JsonValue::Number(number) => Ok(number.to_string()),
        JsonValue::Bool(flag) => Ok(flag.to_string()),
        JsonValue::Null => Ok("null".to_owned()),
        JsonValue::Array(_) | JsonValue::Object(_) => serde_json::to_string(value)
            .map_err(|err| encoding_error(format!("filter value for `{field}` failed to serialize: {err}"))),
    }
}
