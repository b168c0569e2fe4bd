//! Process transports for newline-delimited JSON-RPC over stdio
//!
//! Both transports launch the configured server with piped standard streams.
//! `oneshot` spawns one child per request; `session` keeps a single child
//! alive for every exchange of a scenario.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{Config, ServerCommand, TransportMode};
use crate::errors::HarnessError;
use crate::mcp::rpc::{RequestEnvelope, ResponseEnvelope};

pub mod oneshot;
pub mod session;

pub use oneshot::{send_and_receive, OneshotTransport};
pub use session::SessionTransport;

#[async_trait]
pub trait Transport: Send {
    /// Writes one request and returns the single reply decoded as an envelope.
    async fn exchange(
        &mut self,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, HarnessError>;

    /// Releases any child process still held by the transport.
    async fn shutdown(&mut self) {}
}

pub fn build_transport(config: &Config) -> Box<dyn Transport> {
    match config.transport {
        TransportMode::Persistent => Box::new(SessionTransport::new(
            config.server.clone(),
            config.timeout,
        )),
        TransportMode::Oneshot => Box::new(OneshotTransport::new(
            config.server.clone(),
            config.timeout,
        )),
    }
}

/// Starts the server as the leader of a new session, so that everything it
/// launches (the binary behind `cargo run`, say) shares its process group.
pub(crate) fn spawn_server(command: &ServerCommand) -> Result<Child, HarnessError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            Ok(())
        });
    }

    cmd.spawn()
        .map_err(|err| HarnessError::process(format!("{}: {err}", command.display())))
}

/// Sends SIGKILL to every process in the server's group. Returns false when
/// the group could not be signalled.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(err) => {
            warn!(pid, error = %err, "failed to kill server process group");
            false
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) -> bool {
    false
}

/// Kills the server together with anything it spawned, then reaps it.
pub(crate) async fn kill_and_reap(child: &mut Child, pid: Option<u32>) {
    if !pid.is_some_and(kill_process_group) {
        if let Err(err) = child.start_kill() {
            debug!(pid, error = %err, "failed to kill server process");
        }
    }
    if let Err(err) = child.wait().await {
        warn!(pid, error = %err, "failed to reap server process");
    }
}
