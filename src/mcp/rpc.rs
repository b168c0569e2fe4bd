//! JSON-RPC envelope representations and wire framing
//!
//! Requests are encoded as one compact JSON object per line. Responses are
//! decoded from a single line and validated against the JSON-RPC 2.0 shape
//! before the driver interprets them.

use rust_mcp_sdk::schema::RequestId;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{HarnessError, RpcError};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    #[serde(rename = "initialize")]
    Initialize,
    #[serde(rename = "tools/list")]
    ToolsList,
    #[serde(rename = "tools/call")]
    ToolsCall,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(id: u64, method: Method, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Canonical wire form: compact JSON terminated by exactly one newline.
    pub fn to_line(&self) -> Result<String, HarnessError> {
        let encoded = serde_json::to_string(self)
            .map_err(|err| HarnessError::protocol(format!("failed to encode request: {err}")))?;
        Ok(encoded + "\n")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(RpcError),
}

#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub id: Option<RequestId>,
    pub body: ResponseBody,
    raw: Value,
}

impl ResponseEnvelope {
    /// Decodes one line of server output. A rejected line is attached to the
    /// error verbatim.
    pub fn from_line(line: &str) -> Result<Self, HarnessError> {
        let line = line.trim();
        let value: Value = serde_json::from_str(line).map_err(|err| {
            HarnessError::protocol(format!("response is not valid JSON: {err}"))
                .with_server_output(line)
        })?;
        Self::from_value(value).map_err(|err| err.with_server_output(line))
    }

    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        let (id, body) =
            validate(&value).map_err(|err| err.with_server_output(value.to_string()))?;
        Ok(Self {
            id,
            body,
            raw: value,
        })
    }

    pub fn matches_id(&self, expected: u64) -> bool {
        match (&self.id, i64::try_from(expected)) {
            (Some(RequestId::Integer(id)), Ok(expected)) => *id == expected,
            _ => false,
        }
    }

    pub fn id_value(&self) -> Value {
        self.id.clone().map(request_id_to_value).unwrap_or(Value::Null)
    }

    /// The envelope exactly as the server sent it.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn validate(value: &Value) -> Result<(Option<RequestId>, ResponseBody), HarnessError> {
    let Some(object) = value.as_object() else {
        return Err(HarnessError::protocol("response is not a JSON object"));
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(HarnessError::protocol(format!(
                "unsupported jsonrpc version {other:?}"
            )))
        }
        None => return Err(HarnessError::protocol("response is missing jsonrpc version")),
    }

    let id = object.get("id").and_then(value_to_request_id);
    let body = match (object.get("result"), object.get("error")) {
        (Some(result), None) => ResponseBody::Result(result.clone()),
        (None, Some(error)) => ResponseBody::Error(parse_rpc_error(error)?),
        (Some(_), Some(_)) => {
            return Err(HarnessError::protocol(
                "response carries both result and error",
            ))
        }
        (None, None) => {
            return Err(HarnessError::protocol(
                "response carries neither result nor error",
            ))
        }
    };

    Ok((id, body))
}

fn parse_rpc_error(error: &Value) -> Result<RpcError, HarnessError> {
    let object = error
        .as_object()
        .ok_or_else(|| HarnessError::protocol("error field is not an object"))?;
    let code = object
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| HarnessError::protocol("error object is missing an integer code"))?;
    let message = object
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| HarnessError::protocol("error object is missing a string message"))?;

    Ok(RpcError {
        code,
        message: message.to_string(),
        data: object.get("data").cloned(),
    })
}

/// True when a decoded line looks like a response rather than a notification
/// or a server-initiated request.
pub fn is_response_object(object: &Map<String, Value>) -> bool {
    !object.contains_key("method")
        && (object.contains_key("result") || object.contains_key("error"))
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_line_is_compact_and_newline_terminated() {
        let request = RequestEnvelope::new(1, Method::Initialize, None);
        let line = request.to_line().expect("encode");

        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn tool_call_request_carries_params() {
        let request = RequestEnvelope::new(
            4,
            Method::ToolsCall,
            Some(json!({"name": "health_check", "arguments": {}})),
        );
        let value = request.to_value();

        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "health_check");
        assert!(value["params"]["arguments"].is_object());
    }

    #[test]
    fn parses_result_response() {
        let response = ResponseEnvelope::from_line(
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#,
        )
        .expect("valid response");

        assert!(response.matches_id(2));
        assert!(!response.matches_id(3));
        assert_eq!(response.body, ResponseBody::Result(json!({"tools": []})));
    }

    #[test]
    fn parses_error_response() {
        let response = ResponseEnvelope::from_line(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Unknown tool: nope"}}"#,
        )
        .expect("valid response");

        match response.body {
            ResponseBody::Error(err) => {
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "Unknown tool: nope");
                assert!(err.data.is_none());
            }
            other => panic!("expected error body, got {other:?}"),
        }
    }

    #[test]
    fn rejects_both_or_neither_result_and_error() {
        let both = ResponseEnvelope::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {},
            "error": {"code": 1, "message": "x"}
        }))
        .expect_err("both must fail");
        assert!(matches!(both, HarnessError::Protocol { .. }));

        let neither = ResponseEnvelope::from_value(json!({"jsonrpc": "2.0", "id": 1}))
            .expect_err("neither must fail");
        assert!(matches!(neither, HarnessError::Protocol { .. }));
    }

    #[test]
    fn rejects_non_object_and_wrong_version() {
        let err = ResponseEnvelope::from_line("[1,2,3]").expect_err("array must fail");
        assert!(matches!(err, HarnessError::Protocol { .. }));

        let err = ResponseEnvelope::from_line("Compiling tradergrader v0.1.0")
            .expect_err("text must fail");
        assert!(matches!(err, HarnessError::Protocol { .. }));

        let err = ResponseEnvelope::from_value(json!({"jsonrpc": "1.0", "id": 1, "result": {}}))
            .expect_err("old version must fail");
        assert!(err.to_string().contains("unsupported jsonrpc version"));
    }

    #[test]
    fn rejected_line_travels_with_the_error() {
        let err = ResponseEnvelope::from_line("  thread 'main' panicked at src/main.rs:4:5  ")
            .expect_err("text must fail");
        assert_eq!(
            err.server_output(),
            Some("thread 'main' panicked at src/main.rs:4:5")
        );

        let line = r#"{"jsonrpc":"2.0","id":1}"#;
        let err = ResponseEnvelope::from_line(line).expect_err("neither must fail");
        assert_eq!(err.server_output(), Some(line));
    }

    #[test]
    fn rejects_malformed_error_object() {
        let err = ResponseEnvelope::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"message": "no code"}
        }))
        .expect_err("missing code must fail");
        assert!(err.to_string().contains("integer code"));
    }

    #[test]
    fn string_and_null_ids_never_match_numeric_requests() {
        let string_id =
            ResponseEnvelope::from_value(json!({"jsonrpc": "2.0", "id": "1", "result": {}}))
                .expect("valid response");
        assert!(!string_id.matches_id(1));
        assert_eq!(string_id.id_value(), json!("1"));

        let null_id =
            ResponseEnvelope::from_value(json!({"jsonrpc": "2.0", "id": null, "result": {}}))
                .expect("valid response");
        assert!(!null_id.matches_id(1));
        assert!(null_id.id_value().is_null());
    }

    #[test]
    fn notifications_are_not_responses() {
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}});
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {}});

        assert!(!is_response_object(notification.as_object().expect("object")));
        assert!(is_response_object(response.as_object().expect("object")));
    }
}
