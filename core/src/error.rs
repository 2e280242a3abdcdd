//! Error types for compilation and stage execution

use std::time::Duration;
use thiserror::Error;

/// Result type alias for compilation
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Errors raised by the protocol compiler in strict mode
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A stage call references a name that no stage call produces
    #[error("line {line}: step '{step_id}' references unresolved name '{name}'")]
    UnresolvedDependency {
        step_id: String,
        name: String,
        line: usize,
    },

    /// Two stage calls assign the same output variable
    #[error("line {line}: output variable '{output}' already assigned on line {first_line}")]
    DuplicateOutput {
        output: String,
        line: usize,
        first_line: usize,
    },
}

/// Errors a stage can report back to the orchestrator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// The stage ran and failed
    #[error("{0}")]
    Failed(String),

    /// No stage is registered under the canonical id
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// The stage did not finish within the configured step timeout
    #[error("stage timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled before or while the stage ran
    #[error("execution cancelled")]
    Cancelled,

    /// The stage task panicked or was aborted
    #[error("stage task aborted: {0}")]
    Aborted(String),
}

impl StageError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
