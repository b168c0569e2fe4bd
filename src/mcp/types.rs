//! Lenient views over MCP result payloads
//!
//! Only the shape needed to judge a reply is checked; per-tool schemas and
//! capability contents are left to the server.

use serde_json::Value;

use crate::errors::HarnessError;

#[derive(Debug, Clone, PartialEq)]
pub struct InitializeOutcome {
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub protocol_version: Option<String>,
    pub raw: Value,
}

impl InitializeOutcome {
    pub fn from_result(result: Value) -> Result<Self, HarnessError> {
        if !result.is_object() {
            return Err(HarnessError::protocol("initialize result is not an object"));
        }

        let server_info = result.get("serverInfo");
        let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            server_name: text(server_info.and_then(|info| info.get("name"))),
            server_version: text(server_info.and_then(|info| info.get("version"))),
            protocol_version: text(result.get("protocolVersion")),
            raw: result,
        })
    }

    /// Server name, when it is present and not blank.
    pub fn identity(&self) -> Option<&str> {
        self.server_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolList {
    pub tools: Vec<Value>,
}

impl ToolList {
    pub fn from_result(result: Value) -> Result<Self, HarnessError> {
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| HarnessError::protocol("tools/list result has no tools array"))?;
        Ok(Self { tools })
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<Value>,
    pub is_error: bool,
    pub raw: Value,
}

impl ToolOutput {
    pub fn from_result(result: Value) -> Result<Self, HarnessError> {
        if !result.is_object() {
            return Err(HarnessError::protocol("tools/call result is not an object"));
        }

        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            content,
            is_error,
            raw: result,
        })
    }

    /// Concatenated text of every `text` content block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initialize_extracts_server_identity() {
        let outcome = InitializeOutcome::from_result(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "TraderGrader", "version": "0.1.0"}
        }))
        .expect("object result");

        assert_eq!(outcome.identity(), Some("TraderGrader"));
        assert_eq!(outcome.server_version.as_deref(), Some("0.1.0"));
        assert_eq!(outcome.protocol_version.as_deref(), Some("2024-11-05"));
    }

    #[test]
    fn initialize_without_identity_still_decodes() {
        let outcome = InitializeOutcome::from_result(json!({"serverInfo": {"name": "  "}}))
            .expect("object result");
        assert_eq!(outcome.identity(), None);

        let err = InitializeOutcome::from_result(json!("ready")).expect_err("string result");
        assert!(matches!(err, HarnessError::Protocol { .. }));
    }

    #[test]
    fn tool_list_requires_an_array() {
        let list = ToolList::from_result(json!({
            "tools": [
                {"name": "health_check", "inputSchema": {"type": "object"}},
                {"description": "nameless tools are tolerated"},
                {"name": "get_market_summary"}
            ]
        }))
        .expect("array");

        assert_eq!(list.tools.len(), 3);
        assert_eq!(list.names(), vec!["health_check", "get_market_summary"]);

        let err = ToolList::from_result(json!({"tools": {"health_check": {}}}))
            .expect_err("object is not list-shaped");
        assert!(err.to_string().contains("no tools array"));
    }

    #[test]
    fn tool_output_joins_text_blocks() {
        let output = ToolOutput::from_result(json!({
            "content": [
                {"type": "text", "text": "Market Summary for Type 34"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "Spread: 0.12 ISK"}
            ]
        }))
        .expect("object result");

        assert!(!output.is_error);
        assert_eq!(output.text(), "Market Summary for Type 34\nSpread: 0.12 ISK");
    }

    #[test]
    fn tool_output_reads_is_error_flag() {
        let output = ToolOutput::from_result(json!({
            "content": [{"type": "text", "text": "upstream unavailable"}],
            "isError": true
        }))
        .expect("object result");

        assert!(output.is_error);
    }
}
