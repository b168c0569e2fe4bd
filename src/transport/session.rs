use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerCommand;
use crate::errors::HarnessError;
use crate::mcp::rpc::{is_response_object, RequestEnvelope, ResponseEnvelope};
use crate::transport::oneshot::captured_output;
use crate::transport::{kill_and_reap, kill_process_group, spawn_server, Transport};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const STDERR_TAIL_LINES: usize = 50;

/// Keeps one server process open across exchanges so that state negotiated
/// by earlier requests is visible to later ones.
///
/// Replies must arrive in request order: the first response read after a
/// request has to carry that request's id. Blank lines, non-JSON lines and
/// server notifications on stdout are skipped. Any failure tears the child
/// down; the next exchange starts a fresh one.
pub struct SessionTransport {
    command: ServerCommand,
    timeout: Duration,
    server: Option<RunningServer>,
    spawn_count: u32,
}

struct RunningServer {
    child: Child,
    pid: Option<u32>,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// Non-blank stdout lines read since the current request was written.
    stdout_seen: Vec<String>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: JoinHandle<()>,
}

impl SessionTransport {
    pub fn new(command: ServerCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            server: None,
            spawn_count: 0,
        }
    }

    /// Pid of the live server process, if one is running.
    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().and_then(|server| server.pid)
    }

    fn ensure_running(&mut self) -> Result<&mut RunningServer, HarnessError> {
        let exited = match self.server.as_mut() {
            Some(server) => server.child.try_wait().ok().flatten(),
            None => None,
        };
        if let Some(status) = exited {
            warn!(status = %status, "server exited between requests");
            self.discard();
        }

        if self.server.is_none() {
            if self.spawn_count > 0 {
                warn!(
                    command = %self.command.display(),
                    "respawning server; state from earlier requests is lost"
                );
            }
            let server = RunningServer::spawn(&self.command)?;
            self.spawn_count += 1;
            info!(pid = server.pid, command = %self.command.display(), "server started");
            self.server = Some(server);
        }

        self.server
            .as_mut()
            .ok_or_else(|| HarnessError::process("server process unavailable"))
    }

    fn discard(&mut self) {
        if let Some(server) = self.server.take() {
            if let Some(pid) = server.pid {
                kill_process_group(pid);
            }
            server.stderr_task.abort();
        }
    }

    /// Kills the server and returns whatever it wrote during the exchange
    /// that failed.
    async fn teardown(&mut self) -> String {
        let Some(mut server) = self.server.take() else {
            return String::new();
        };
        kill_and_reap(&mut server.child, server.pid).await;
        finish_stderr(&mut server.stderr_task).await;
        server.captured_output()
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn exchange(
        &mut self,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope, HarnessError> {
        let line = request.to_line()?;
        let timeout = self.timeout;
        let server = self.ensure_running()?;

        let outcome = tokio::time::timeout(timeout, server.round_trip(&line, request.id)).await;
        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                let output = self.teardown().await;
                Err(err.with_server_output(output))
            }
            Err(_) => {
                warn!(
                    method = request.method.as_str(),
                    id = request.id,
                    "server timed out and was killed"
                );
                self.teardown().await;
                Err(HarnessError::timeout(timeout))
            }
        }
    }

    async fn shutdown(&mut self) {
        let Some(mut server) = self.server.take() else {
            return;
        };

        // Closing stdin is the end-of-session signal for a stdio server.
        drop(server.stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, server.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = server.pid, status = %status, "server exited");
                if let Some(pid) = server.pid {
                    kill_process_group(pid);
                }
            }
            Ok(Err(err)) => warn!(pid = server.pid, error = %err, "failed to wait for server"),
            Err(_) => {
                debug!(pid = server.pid, "server ignored end of input; killing");
                kill_and_reap(&mut server.child, server.pid).await;
            }
        }
        finish_stderr(&mut server.stderr_task).await;
    }
}

/// Lets the stderr reader drain what the exited server left in the pipe.
async fn finish_stderr(stderr_task: &mut JoinHandle<()>) {
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut *stderr_task)
        .await
        .is_err()
    {
        stderr_task.abort();
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.discard();
    }
}

impl RunningServer {
    fn spawn(command: &ServerCommand) -> Result<Self, HarnessError> {
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

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let tail = stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(pid, line = %line, "server stderr");
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        });

        Ok(Self {
            child,
            pid,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stdout_seen: Vec::new(),
            stderr_tail,
            stderr_task,
        })
    }

    fn captured_output(&self) -> String {
        let stderr = match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        };
        captured_output(&self.stdout_seen.join("\n"), &stderr)
    }

    async fn round_trip(
        &mut self,
        line: &str,
        request_id: u64,
    ) -> Result<ResponseEnvelope, HarnessError> {
        self.stdout_seen.clear();
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| HarnessError::protocol(format!("failed to write request: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| HarnessError::protocol(format!("failed to flush request: {err}")))?;

        loop {
            let next = self.stdout.next_line().await.map_err(|err| {
                HarnessError::protocol(format!("failed to read server output: {err}"))
            })?;
            let Some(line) = next else {
                return Err(HarnessError::protocol(
                    "server closed its output stream before responding",
                ));
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.stdout_seen.push(trimmed.to_string());

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(_) => {
                    warn!(pid = self.pid, line = %trimmed, "skipping non-JSON line on server stdout");
                    continue;
                }
            };
            if !value.as_object().is_some_and(is_response_object) {
                debug!(pid = self.pid, message = %trimmed, "skipping non-response message");
                continue;
            }

            let response = ResponseEnvelope::from_value(value)?;
            if !response.matches_id(request_id) {
                return Err(HarnessError::protocol(format!(
                    "response id {} does not match request id {request_id}",
                    response.id_value()
                )));
            }
            self.stdout_seen.clear();
            return Ok(response);
        }
    }
}
