//! Command runner trait and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CommandConfig, RunConfig};
use crate::error::RunnerResult;

/// Result of command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code (128 + signal when the child was killed by a signal)
    pub exit_code: i32,
    /// Captured stdout, empty when output was inherited
    pub stdout: String,
    /// Captured stderr, empty when output was inherited
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands on the local machine.
///
/// Execution is blocking; a non-zero exit code is reported in the result,
/// not as an error. Errors mean the command could not be run at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, config: &CommandConfig, run_config: &RunConfig)
        -> RunnerResult<ExecutionResult>;
}
