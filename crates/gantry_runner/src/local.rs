//! Runner backed by `std::process`.

use std::process::{Command, ExitStatus, Stdio};
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use crate::config::{CommandConfig, Invocation, OutputMode, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Executes commands as child processes of gantry.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    /// Build the `std::process::Command` for a configuration.
    fn build_command(&self, config: &CommandConfig) -> RunnerResult<Command> {
        let mut cmd = match &config.invocation {
            Invocation::Shell { shell, script } => {
                let mut cmd = Command::new(shell);
                cmd.arg("-c").arg(script);
                cmd
            }
            Invocation::Argv(argv) => {
                let (program, args) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };

        cmd.envs(&config.env);

        if let Some(dir) = &config.workdir {
            cmd.current_dir(dir);
        }

        Ok(cmd)
    }
}

impl CommandRunner for LocalRunner {
    fn run(
        &self,
        config: &CommandConfig,
        run_config: &RunConfig,
    ) -> RunnerResult<ExecutionResult> {
        let program = config.invocation.program().unwrap_or_default().to_string();
        let mut cmd = self.build_command(config)?;

        debug!("Executing: {}", config.invocation.display());

        let started_at = Utc::now();
        let start = Instant::now();

        let spawn_error = |e: std::io::Error| RunnerError::SpawnFailed {
            program: program.clone(),
            message: e.to_string(),
        };

        let (status, stdout, stderr) = match run_config.output {
            OutputMode::Inherit => {
                let status = cmd
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(spawn_error)?;
                (status, String::new(), String::new())
            }
            OutputMode::Capture => {
                let output = cmd.stdin(Stdio::null()).output().map_err(spawn_error)?;
                (
                    output.status,
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                )
            }
        };

        let exit_code = exit_code(status);
        if exit_code != 0 {
            debug!(
                "{} exited with return code {}",
                config.invocation.display(),
                exit_code
            );
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_shell_exit_code_is_reported() {
        let runner = LocalRunner::new();
        let config = CommandConfig::shell("/bin/sh", "exit 3");

        let result = runner.run(&config, &RunConfig::captured()).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[test]
    fn test_argv_is_not_shell_interpreted() {
        let runner = LocalRunner::new();
        let config = CommandConfig::argv(["echo", "$HOME", "a;b"]);

        let result = runner.run(&config, &RunConfig::captured()).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "$HOME a;b");
    }

    #[test]
    fn test_explicit_vars_override_inherited_ones() {
        let runner = LocalRunner::new();
        let config = CommandConfig::shell("/bin/sh", "echo \"$HOME\"").env("HOME", "/srv/ci");

        let result = runner.run(&config, &RunConfig::captured()).unwrap();
        assert_eq!(result.stdout.trim(), "/srv/ci");
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let runner = LocalRunner::new();
        let config = CommandConfig::argv(Vec::<String>::new());

        let err = runner.run(&config, &RunConfig::captured()).unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let runner = LocalRunner::new();
        let config = CommandConfig::argv(["/definitely/not/a/program"]);

        let err = runner.run(&config, &RunConfig::captured()).unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
    }
}
