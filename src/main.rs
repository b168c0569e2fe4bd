use std::process::ExitCode;

use mcp_smoke::{config::Config, logging, run_smoke_test};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    info!(
        command = %config.server.display(),
        cwd = %config.server.cwd.display(),
        transport = ?config.transport,
        timeout_secs = config.timeout.as_secs(),
        skip_external = config.skip_external,
        "smoke test starting"
    );

    let report = run_smoke_test(&config).await;
    print!("{report}");

    report.exit_code()
}
