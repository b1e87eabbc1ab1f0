//! JSON-RPC message types and LSP response validation.

use crate::model::{Position, Range};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id, integer or string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Int(id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: Value,
}

impl Reply {
    pub fn null(id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// A decoded frame from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    /// Server-to-client request; must be answered
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Incoming {
    /// Classify a raw message. `None` for anything that is not a JSON-RPC
    /// object with either an id or a method.
    pub fn from_value(mut value: Value) -> Option<Self> {
        let object = value.as_object_mut()?;
        let id = object
            .remove("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        let method = object
            .get("method")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        let params = object.remove("params").unwrap_or(Value::Null);
        match (id, method) {
            (Some(id), Some(method)) => Some(Incoming::Request { id, method, params }),
            (None, Some(method)) => Some(Incoming::Notification { method, params }),
            (Some(id), None) => {
                let error = object
                    .remove("error")
                    .and_then(|e| serde_json::from_value::<ResponseError>(e).ok());
                let result = object.remove("result").unwrap_or(Value::Null);
                Some(Incoming::Response(Response { id, result, error }))
            }
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationLink {
    target_uri: String,
    target_range: Range,
    #[serde(default)]
    target_selection_range: Option<Range>,
}

/// Locations from a definition or references result. Accepts `Location`,
/// `Location[]` and `LocationLink[]`; malformed items are dropped.
pub fn parse_locations(value: &Value) -> Vec<Location> {
    match value {
        Value::Array(items) => items.iter().filter_map(parse_location).collect(),
        Value::Object(_) => parse_location(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_location(value: &Value) -> Option<Location> {
    if let Ok(location) = serde_json::from_value::<Location>(value.clone()) {
        return Some(location);
    }
    let link = serde_json::from_value::<LocationLink>(value.clone()).ok()?;
    Some(Location {
        uri: link.target_uri,
        range: link.target_selection_range.unwrap_or(link.target_range),
    })
}

pub fn text_document_position(uri: &str, position: Position) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_incoming_messages() {
        let response = Incoming::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null}));
        assert!(matches!(
            response,
            Some(Incoming::Response(Response { id: RequestId::Int(3), result: Value::Null, error: None }))
        ));

        let request = Incoming::from_value(
            json!({"jsonrpc": "2.0", "id": "a", "method": "workspace/configuration", "params": {}}),
        );
        assert!(matches!(request, Some(Incoming::Request { ref method, .. }) if method == "workspace/configuration"));

        let note = Incoming::from_value(json!({"jsonrpc": "2.0", "method": "window/logMessage"}));
        assert!(matches!(note, Some(Incoming::Notification { .. })));

        assert_eq!(Incoming::from_value(json!([1, 2])), None);
    }

    #[test]
    fn parses_locations_and_links() {
        let range = json!({"start": {"line": 1, "character": 2}, "end": {"line": 3, "character": 4}});
        let single = parse_locations(&json!({"uri": "file:///a.ts", "range": range}));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].range.start.line, 1);

        let links = parse_locations(&json!([
            {"targetUri": "file:///b.ts", "targetRange": range, "targetSelectionRange": range},
            {"bogus": true}
        ]));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "file:///b.ts");

        assert!(parse_locations(&Value::Null).is_empty());
    }
}
