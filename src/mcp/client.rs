//! Request driver for a single MCP server

use std::time::Instant;

use serde_json::{json, Value};
use tracing::info;

use crate::errors::HarnessError;
use crate::logging::redact_audit_params;
use crate::mcp::rpc::{Method, RequestEnvelope, ResponseBody, ResponseEnvelope};
use crate::mcp::types::{InitializeOutcome, ToolList, ToolOutput};
use crate::transport::Transport;

/// One request, the reply it got (if any), and the interpreted outcome.
#[derive(Debug)]
pub struct Exchange<T> {
    pub request: RequestEnvelope,
    pub response: Option<ResponseEnvelope>,
    pub outcome: Result<T, HarnessError>,
}

pub struct McpClient {
    transport: Box<dyn Transport>,
    next_id: u64,
}

impl McpClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: 1,
        }
    }

    pub async fn initialize(&mut self) -> Exchange<InitializeOutcome> {
        self.request(Method::Initialize, None, InitializeOutcome::from_result)
            .await
    }

    pub async fn list_tools(&mut self) -> Exchange<ToolList> {
        self.request(Method::ToolsList, None, ToolList::from_result)
            .await
    }

    /// An `error` reply surfaces as [`HarnessError::Tool`]; failures of the
    /// exchange itself keep their transport or protocol kind.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Exchange<ToolOutput> {
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        self.request(Method::ToolsCall, Some(params), ToolOutput::from_result)
            .await
    }

    pub async fn shutdown(&mut self) {
        self.transport.shutdown().await;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn request<T>(
        &mut self,
        method: Method,
        params: Option<Value>,
        decode: fn(Value) -> Result<T, HarnessError>,
    ) -> Exchange<T> {
        let request = RequestEnvelope::new(self.allocate_id(), method, params);
        let started_at = Instant::now();

        let (response, outcome) = match self.transport.exchange(&request).await {
            Ok(response) => {
                let outcome = interpret(&request, &response, decode);
                (Some(response), outcome)
            }
            Err(err) => (None, Err(err)),
        };

        let outcome_kind = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        info!(
            method = method.as_str(),
            id = request.id,
            params = %redact_audit_params(request.params.as_ref()),
            duration_ms = started_at.elapsed().as_millis(),
            outcome = outcome_kind,
            "mcp exchange audited"
        );

        Exchange {
            request,
            response,
            outcome,
        }
    }
}

fn interpret<T>(
    request: &RequestEnvelope,
    response: &ResponseEnvelope,
    decode: fn(Value) -> Result<T, HarnessError>,
) -> Result<T, HarnessError> {
    if !response.matches_id(request.id) {
        return Err(HarnessError::protocol(format!(
            "response id {} does not match request id {}",
            response.id_value(),
            request.id
        )));
    }

    match &response.body {
        ResponseBody::Result(result) => decode(result.clone()),
        ResponseBody::Error(err) if request.method == Method::ToolsCall => {
            Err(HarnessError::Tool(err.clone()))
        }
        ResponseBody::Error(err) => Err(HarnessError::Rpc(err.clone())),
    }
}
