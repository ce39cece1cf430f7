use std::io;
use std::path::PathBuf;

use installcheck_retry::ErrorClass;

use crate::types::{Phase, ScenarioKind};

/// Why a single step failed.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("`{command}` exited with code {exit_code}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        timed_out: bool,
        stderr: String,
    },
    #[error("could not start `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("command-line entry point `{bin}` not found after install")]
    MissingBin { bin: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.trim().lines().last() {
        Some(line) if !line.trim().is_empty() => format!(": {}", line.trim()),
        _ => String::new(),
    }
}

/// A failed scenario attempt: which scenario, in which phase, and why.
#[derive(Debug, thiserror::Error)]
#[error("{scenario}: {}: {cause}", .phase.failure_reason())]
pub struct ScenarioError {
    pub scenario: ScenarioKind,
    pub phase: Phase,
    #[source]
    pub cause: FailureCause,
}

impl ScenarioError {
    pub fn new(scenario: ScenarioKind, phase: Phase, cause: FailureCause) -> Self {
        Self {
            scenario,
            phase,
            cause,
        }
    }

    /// Any external command failure gets another attempt: a non-zero exit,
    /// a timeout, a command that could not be started, or an entry point
    /// that was not linked. Local filesystem errors do not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.cause, FailureCause::Io { .. })
    }

    pub fn class(&self) -> ErrorClass {
        if self.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Permanent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported package manager `{0}` (supported: {supported})", supported = crate::manager::SUPPORTED_MANAGERS.join(", "))]
pub struct UnsupportedManager(pub String);

/// Anything that ends a run unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    UnsupportedManager(#[from] UnsupportedManager),
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),
    #[error("failed to start heartbeat: {0:#}")]
    Heartbeat(anyhow::Error),
    #[error("failed to open log file {}: {cause:#}", path.display())]
    LogFile { path: PathBuf, cause: anyhow::Error },
    #[error("failed after {attempts} attempt(s): {source}")]
    Scenario {
        attempts: u32,
        #[source]
        source: ScenarioError,
    },
    #[error("failed to write receipt: {0:#}")]
    Receipt(anyhow::Error),
}
