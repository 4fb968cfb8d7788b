//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait
//! for use in unit tests without spawning processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 10,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 10,
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub config: CommandConfig,
    pub run_config: RunConfig,
}

/// Mock command runner for testing.
///
/// Records every call and hands out the queued responses in order,
/// cycling when the queue is exhausted.
#[derive(Clone)]
pub struct MockRunner {
    /// Predefined responses for run calls.
    responses: Arc<RwLock<Vec<MockResponse>>>,
    /// Index of next response to return.
    response_index: Arc<AtomicUsize>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    /// Simulated spawn failure.
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
        }
    }

    /// Add a mock response for the next run call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Set multiple responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Set a failure to simulate.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// The most recent call, if any.
    pub fn last_call(&self) -> Option<CapturedCall> {
        self.captured_calls.read().last().cloned()
    }

    fn next_response(&self) -> MockResponse {
        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        config: &CommandConfig,
        run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        self.captured_calls.write().push(CapturedCall {
            config: config.clone(),
            run_config: run_config.clone(),
        });

        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }

        let response = self.next_response();
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Invocation;

    #[test]
    fn test_mock_runner_captures_calls() {
        let runner = MockRunner::new();

        let config = CommandConfig::shell("/bin/bash", "make deploy").env("BUILD_ID", "7");
        runner.run(&config, &RunConfig::default()).unwrap();

        assert_eq!(runner.call_count(), 1);
        let call = runner.last_call().unwrap();
        assert_eq!(
            call.config.invocation,
            Invocation::Shell {
                shell: "/bin/bash".to_string(),
                script: "make deploy".to_string()
            }
        );
        assert_eq!(call.config.env.get("BUILD_ID"), Some(&"7".to_string()));
    }

    #[test]
    fn test_mock_runner_multiple_responses() {
        let runner = MockRunner::new().with_responses(vec![
            MockResponse::success("first"),
            MockResponse::failure(2, "second failed"),
        ]);
        let config = CommandConfig::argv(["true"]);

        let r1 = runner.run(&config, &RunConfig::default()).unwrap();
        assert_eq!(r1.stdout, "first");

        let r2 = runner.run(&config, &RunConfig::default()).unwrap();
        assert_eq!(r2.exit_code, 2);
        assert_eq!(r2.stderr, "second failed");
    }

    #[test]
    fn test_mock_runner_failure_simulation() {
        let runner = MockRunner::new().simulate_failure("no such program");
        let config = CommandConfig::argv(["missing"]);

        assert!(runner.run(&config, &RunConfig::default()).is_err());
        assert_eq!(runner.call_count(), 1);
    }
}
