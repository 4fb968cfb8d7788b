//! Error types for stack operations.

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for stack operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur while building or operating a stack.
#[derive(Error, Debug)]
pub enum IacError {
    /// Bad input: arguments, document shape, unsupported dialect or type.
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Template(#[from] gantry_templates::TemplateError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Template validation rejected by the provider; carries the bare
    /// provider message.
    #[error("{message}")]
    Validation { stack: String, message: String },

    #[error("{action} failed: command {command} exited with return code {code}")]
    CommandFailed {
        action: String,
        command: String,
        code: i32,
    },

    #[error("No decision was made for change set {change_set}: input closed")]
    ReviewAborted { change_set: String },

    #[error("Runner error: {0}")]
    Runner(#[from] gantry_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IacError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True when the error is the provider reporting a missing stack.
    pub fn is_missing_stack(&self) -> bool {
        matches!(self, IacError::Remote(e) if e.is_missing_stack())
    }
}
