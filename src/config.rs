use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_SERVER_COMMAND: &str = "cargo run";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// One child process held open for the whole scenario.
    Persistent,
    /// A fresh child per request; no server state survives between steps.
    Oneshot,
}

/// How to launch the server under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl ServerCommand {
    pub fn parse(command_line: &str, cwd: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConfigError::EmptyCommand)?;

        Ok(Self {
            program,
            args: parts.collect(),
            cwd: cwd.into(),
        })
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerCommand,
    pub timeout: Duration,
    pub transport: TransportMode,
    pub skip_external: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_SMOKE_SERVER_COMMAND must not be empty")]
    EmptyCommand,
    #[error("MCP_SMOKE_TIMEOUT_SECS must be a positive integer")]
    InvalidTimeout,
    #[error("MCP_SMOKE_TRANSPORT must be one of: persistent, oneshot")]
    InvalidTransport,
    #[error("MCP_SMOKE_SKIP_EXTERNAL must be a boolean")]
    InvalidSkipExternal,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let command_line = env::var("MCP_SMOKE_SERVER_COMMAND")
            .unwrap_or_else(|_| DEFAULT_SERVER_COMMAND.to_string());
        let cwd = env::var("MCP_SMOKE_SERVER_DIR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let server = ServerCommand::parse(&command_line, cwd)?;

        let timeout_secs = env::var("MCP_SMOKE_TIMEOUT_SECS")
            .ok()
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::InvalidTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let transport = match env::var("MCP_SMOKE_TRANSPORT")
            .ok()
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .as_deref()
        {
            None | Some("persistent") => TransportMode::Persistent,
            Some("oneshot") => TransportMode::Oneshot,
            Some(_) => return Err(ConfigError::InvalidTransport),
        };

        let skip_external = env::var("MCP_SMOKE_SKIP_EXTERNAL")
            .ok()
            .map(|value| parse_flag(&value).ok_or(ConfigError::InvalidSkipExternal))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            server,
            timeout: Duration::from_secs(timeout_secs),
            transport,
            skip_external,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Some(false),
        "1" | "true" | "yes" => Some(true),
        _ => None,
    }
}
