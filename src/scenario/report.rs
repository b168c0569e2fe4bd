use std::fmt;
use std::process::ExitCode;

use serde_json::Value;

use crate::errors::HarnessError;
use crate::mcp::rpc::{RequestEnvelope, ResponseEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

/// Outcome of one scenario step. Created once by the runner and never
/// modified afterwards.
#[derive(Debug)]
pub struct StepResult {
    pub label: String,
    pub external: bool,
    pub request: Option<RequestEnvelope>,
    pub response: Option<ResponseEnvelope>,
    pub error: Option<HarnessError>,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct SessionReport {
    pub steps: Vec<StepResult>,
}

impl SessionReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }

    /// True when no step failed. Skipped steps do not count against the run.
    pub fn succeeded(&self) -> bool {
        self.count(StepStatus::Failed) == 0
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .steps
            .iter()
            .map(|step| format!("{} {} - {}", step.status.as_str(), step.label, step.detail))
            .collect();
        lines.push(format!(
            "{} steps: {} passed, {} failed, {} skipped",
            self.steps.len(),
            self.count(StepStatus::Passed),
            self.count(StepStatus::Failed),
            self.count(StepStatus::Skipped)
        ));
        lines.join("\n")
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.label)?;
        if self.external {
            writeln!(f, "WARNING: this step contacts a real external dependency")?;
        }
        if let Some(request) = &self.request {
            writeln!(f, "request:")?;
            writeln!(f, "{}", pretty(&request.to_value()))?;
        }
        if let Some(response) = &self.response {
            writeln!(f, "response:")?;
            writeln!(f, "{}", pretty(response.raw()))?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "error:")?;
            writeln!(f, "{}", pretty(&error.to_report_value()))?;
            if let Some(output) = error.server_output() {
                writeln!(f, "server output:")?;
                writeln!(f, "{output}")?;
            }
        }
        writeln!(f, "{}: {}", self.status.as_str(), self.detail)
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        writeln!(f, "=== summary ===")?;
        writeln!(f, "{}", self.summary())
    }
}
