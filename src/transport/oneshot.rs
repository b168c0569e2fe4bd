use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerCommand;
use crate::errors::HarnessError;
use crate::mcp::rpc::{RequestEnvelope, ResponseEnvelope};
use crate::transport::{kill_and_reap, spawn_server, Transport};

/// Spawns a fresh server for every request. Server-side state never survives
/// from one exchange to the next.
#[derive(Debug, Clone)]
pub struct OneshotTransport {
    command: ServerCommand,
    timeout: Duration,
}

impl OneshotTransport {
    pub fn new(command: ServerCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Transport for OneshotTransport {
    async fn exchange(
        &mut self,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, HarnessError> {
        send_and_receive(&self.command, request, self.timeout).await
    }
}

/// Runs one request/response cycle against a freshly spawned server.
///
/// The request line is written and stdin closed, then the child is awaited
/// until it exits and its output streams close. Both must happen within
/// `timeout`; otherwise the whole process group is killed. The reply is the
/// last non-empty line of stdout.
pub async fn send_and_receive(
    command: &ServerCommand,
    payload: &RequestEnvelope,
    timeout: Duration,
) -> Result<ResponseEnvelope, HarnessError> {
    let deadline = Instant::now() + timeout;
    let line = payload.to_line()?;
    let mut child = spawn_server(command)?;
    let pid = child.id();

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| HarnessError::process("server stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError::process("server stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HarnessError::process("server stderr was not captured"))?;

    let mut stdout_task = tokio::spawn(read_to_string(stdout));
    let mut stderr_task = tokio::spawn(read_to_string(stderr));

    let waited = tokio::time::timeout_at(deadline, async {
        write_request(stdin, &line).await;
        child.wait().await
    })
    .await;

    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            kill_and_reap(&mut child, pid).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(HarnessError::process(format!(
                "failed to wait for server process: {err}"
            )));
        }
        Err(_) => {
            kill_and_reap(&mut child, pid).await;
            stdout_task.abort();
            stderr_task.abort();
            warn!(pid, method = payload.method.as_str(), "server timed out and was killed");
            return Err(HarnessError::timeout(timeout));
        }
    };

    // A process left behind by the server can hold the pipes open after the
    // server itself has exited.
    let drained = tokio::time::timeout_at(deadline, async {
        let stdout = (&mut stdout_task).await.unwrap_or_default();
        let stderr = (&mut stderr_task).await.unwrap_or_default();
        (stdout, stderr)
    })
    .await;

    let (stdout, stderr) = match drained {
        Ok(output) => output,
        Err(_) => {
            kill_and_reap(&mut child, pid).await;
            stdout_task.abort();
            stderr_task.abort();
            warn!(
                pid,
                method = payload.method.as_str(),
                "server output stayed open past the timeout; process group killed"
            );
            return Err(HarnessError::timeout(timeout));
        }
    };

    for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
        info!(pid, line = %line, "server stderr");
    }
    if !status.success() {
        info!(pid, status = %status, "server exited unsuccessfully");
    }

    let decoded = match last_non_empty_line(&stdout) {
        Some(last) => ResponseEnvelope::from_line(last),
        None => Err(HarnessError::protocol("server produced no output")),
    };
    decoded.map_err(|err| err.with_server_output(captured_output(&stdout, &stderr)))
}

pub fn last_non_empty_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

// A server that exits without reading its input closes the pipe early; that
// shows up as missing output rather than as a write failure.
async fn write_request(mut stdin: ChildStdin, line: &str) {
    if let Err(err) = stdin.write_all(line.as_bytes()).await {
        debug!(error = %err, "failed to write request to server stdin");
        return;
    }
    if let Err(err) = stdin.flush().await {
        debug!(error = %err, "failed to flush server stdin");
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        debug!(error = %err, "failed to read server output");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Both output streams, labelled, for attaching to a failed exchange.
pub(crate) fn captured_output(stdout: &str, stderr: &str) -> String {
    let mut captured = String::new();
    for (stream, text) in [("stdout", stdout), ("stderr", stderr)] {
        let text = text.trim_end();
        if !text.is_empty() {
            captured.push_str(&format!("[{stream}]\n{text}\n"));
        }
    }
    captured.trim_end().to_string()
}
