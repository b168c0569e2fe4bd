use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A well-formed JSON-RPC `error` object returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to start server process: {message}")]
    Process { message: String },
    #[error("server did not respond within {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },
    /// `server_output` holds what the server wrote around the bad exchange,
    /// when it was captured.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        server_output: Option<String>,
    },
    #[error("tool error {}: {}", .0.code, .0.message)]
    Tool(RpcError),
    #[error("server error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

impl HarnessError {
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            server_output: None,
        }
    }

    /// Attaches captured server output to a protocol error, replacing any
    /// output attached earlier. Other kinds and empty output are left as is.
    pub fn with_server_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if let Self::Protocol { server_output, .. } = &mut self {
            if !output.trim().is_empty() {
                *server_output = Some(output);
            }
        }
        self
    }

    pub fn server_output(&self) -> Option<&str> {
        match self {
            Self::Protocol { server_output, .. } => server_output.as_deref(),
            _ => None,
        }
    }

    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis(),
        }
    }

    /// True when the exchange itself failed, as opposed to the server
    /// answering with a conformant `error` response.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            Self::Process { .. } | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Tool(_) => "tool_error",
            Self::Rpc(_) => "rpc_error",
        }
    }

    /// Report-friendly JSON rendering of the failure.
    pub fn to_report_value(&self) -> Value {
        match self {
            Self::Tool(err) | Self::Rpc(err) => json!({
                "kind": self.kind(),
                "code": err.code,
                "message": err.message,
                "data": err.data,
            }),
            _ => json!({
                "kind": self.kind(),
                "message": self.to_string(),
            }),
        }
    }
}
