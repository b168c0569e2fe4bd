//! Fixed smoke-test scenario over the MCP request driver
//!
//! Runs each step in order, records what went over the wire, and keeps going
//! after a failed step so that every step reports.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::HarnessError;
use crate::mcp::{Exchange, McpClient};

pub mod report;

pub use report::{SessionReport, StepResult, StepStatus};

pub const HEALTH_CHECK_TOOL: &str = "health_check";
pub const MARKET_SUMMARY_TOOL: &str = "get_market_summary";
/// The Forge.
pub const MARKET_REGION_ID: i64 = 10000002;
/// Tritanium.
pub const MARKET_TYPE_ID: i64 = 34;

const DETAIL_TEXT_LIMIT: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Initialize,
    ListTools,
    CallTool { name: String, arguments: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub label: String,
    pub kind: StepKind,
    /// Set when the step reaches a real external service and is not safe to
    /// repeat in automated re-runs.
    pub external: bool,
}

impl Step {
    pub fn initialize() -> Self {
        Self {
            label: "initialize".to_string(),
            kind: StepKind::Initialize,
            external: false,
        }
    }

    pub fn list_tools() -> Self {
        Self {
            label: "list_tools".to_string(),
            kind: StepKind::ListTools,
            external: false,
        }
    }

    pub fn call_tool(name: &str, arguments: Value) -> Self {
        Self {
            label: format!("call_tool({name})"),
            kind: StepKind::CallTool {
                name: name.to_string(),
                arguments,
            },
            external: false,
        }
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}

pub fn default_steps() -> Vec<Step> {
    vec![
        Step::initialize(),
        Step::list_tools(),
        Step::call_tool(HEALTH_CHECK_TOOL, json!({})),
        Step::call_tool(
            MARKET_SUMMARY_TOOL,
            json!({
                "region_id": MARKET_REGION_ID,
                "type_id": MARKET_TYPE_ID,
            }),
        )
        .external(),
    ]
}

pub struct ScenarioRunner {
    client: McpClient,
    skip_external: bool,
}

impl ScenarioRunner {
    pub fn new(client: McpClient) -> Self {
        Self {
            client,
            skip_external: false,
        }
    }

    pub fn skip_external(mut self, skip: bool) -> Self {
        self.skip_external = skip;
        self
    }

    /// Runs every step, then shuts the client down.
    pub async fn run(mut self, steps: &[Step]) -> SessionReport {
        let mut report = SessionReport::default();

        for step in steps {
            let result = self.run_step(step).await;
            info!(
                step = %result.label,
                status = result.status.as_str(),
                detail = %result.detail,
                "scenario step finished"
            );
            report.steps.push(result);
        }

        self.client.shutdown().await;
        report
    }

    async fn run_step(&mut self, step: &Step) -> StepResult {
        if step.external {
            if self.skip_external {
                return StepResult {
                    label: step.label.clone(),
                    external: true,
                    request: None,
                    response: None,
                    error: None,
                    status: StepStatus::Skipped,
                    detail: "skipped: contacts a real external dependency".to_string(),
                };
            }
            warn!(step = %step.label, "step makes a real call to an external dependency");
        }

        match &step.kind {
            StepKind::Initialize => {
                let exchange = self.client.initialize().await;
                judge(step, exchange, |outcome| match outcome.identity() {
                    Some(name) => Ok(format!(
                        "server {name} {} (protocol {})",
                        outcome.server_version.as_deref().unwrap_or("unknown"),
                        outcome.protocol_version.as_deref().unwrap_or("unknown")
                    )),
                    None => Err("initialize result has no server identity".to_string()),
                })
            }
            StepKind::ListTools => {
                let exchange = self.client.list_tools().await;
                judge(step, exchange, |tools| {
                    Ok(format!(
                        "{} tools: {}",
                        tools.tools.len(),
                        tools.names().join(", ")
                    ))
                })
            }
            StepKind::CallTool { name, arguments } => {
                let exchange = self.client.call_tool(name, arguments.clone()).await;
                judge(step, exchange, |output| {
                    let text = first_line(&output.text());
                    if output.is_error {
                        Err(format!("tool reported isError: {text}"))
                    } else {
                        Ok(text)
                    }
                })
            }
        }
    }
}

fn judge<T>(
    step: &Step,
    exchange: Exchange<T>,
    check: impl FnOnce(&T) -> Result<String, String>,
) -> StepResult {
    let Exchange {
        request,
        response,
        outcome,
    } = exchange;

    let (status, error, detail) = match outcome {
        Ok(value) => match check(&value) {
            Ok(detail) => (StepStatus::Passed, None, detail),
            Err(detail) => (StepStatus::Failed, None, detail),
        },
        Err(err) => {
            let detail = describe_failure(&err);
            (StepStatus::Failed, Some(err), detail)
        }
    };

    let detail = if step.external {
        format!("[external dependency] {detail}")
    } else {
        detail
    };

    StepResult {
        label: step.label.clone(),
        external: step.external,
        request: Some(request),
        response,
        error,
        status,
        detail,
    }
}

fn describe_failure(err: &HarnessError) -> String {
    if err.is_exchange_failure() {
        format!("exchange failed: {err}")
    } else {
        err.to_string()
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty());
    let Some(line) = line else {
        return "no text content".to_string();
    };

    if line.chars().count() > DETAIL_TEXT_LIMIT {
        let truncated: String = line.chars().take(DETAIL_TEXT_LIMIT).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}
