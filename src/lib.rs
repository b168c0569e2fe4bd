pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod scenario;
pub mod transport;

use config::Config;
use mcp::McpClient;
use scenario::{default_steps, ScenarioRunner, SessionReport};

/// Runs the default scenario against the server described by `config`.
pub async fn run_smoke_test(config: &Config) -> SessionReport {
    let client = McpClient::new(transport::build_transport(config));
    ScenarioRunner::new(client)
        .skip_external(config.skip_external)
        .run(&default_steps())
        .await
}
