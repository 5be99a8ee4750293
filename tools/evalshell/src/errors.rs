use crate::image::ExecutionException;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFailure {
    pub backend: String,
    pub cause: String,
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.cause)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShellError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("backend failed to start: {0}")]
    BackendStart(String),
    #[error("session cannot start: {}", render_failures(.0))]
    AllBackendsFailed(Vec<StartFailure>),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("{0}")]
    Execution(ExecutionException),
    #[error("session is closed")]
    SessionClosed,
    #[error("unknown snippet: {0}")]
    UnknownSnippet(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ShellError {
    /// True when the evaluated code itself failed, as opposed to the
    /// machinery running it.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

fn render_failures(failures: &[StartFailure]) -> String {
    if failures.is_empty() {
        return "no execution backends configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
