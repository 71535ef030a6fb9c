//! Engine error kinds
//!
//! Usage errors are returned to the offending caller. Hook timeouts travel
//! inside result records as the error of the affected tests.

use thiserror::Error;

use crate::models::HookKind;

/// Errors raised by the test runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("A test run is already in progress")]
    RunInProgress,

    #[error("No test is currently in progress")]
    NoTestInProgress,

    #[error("\"{hook}\" hook timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    HookTimeout {
        hook: HookKind,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    #[error("Event listener failed: {0:#}")]
    Listener(anyhow::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RunnerError {
    /// Whether this error came from calling the API at the wrong time
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            RunnerError::RunInProgress | RunnerError::NoTestInProgress
        )
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
