//! Generic AWS service calls through the `aws` command line client.
//!
//! Templates may call any action of any service, so these calls are not
//! bound to an SDK client. Every request is written to a temporary file and
//! passed with `--cli-input-json`, so argument maps reach the API unchanged.
//! Results are read back with `--output json`.

use std::io::Write;
use std::sync::{Arc, OnceLock};

use gantry_runner::{CommandConfig, CommandRunner, RunConfig};
use regex::Regex;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::remote::{RemoteError, RemoteResult};

/// Environment variable naming the `aws` executable.
pub const AWS_CLI_ENV: &str = "GANTRY_AWS_CLI";

/// The `aws` CLI, run through a [`CommandRunner`].
#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl AwsCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "aws".to_string(),
        }
    }

    /// Use `GANTRY_AWS_CLI` as the executable when it is set.
    pub fn from_env(runner: Arc<dyn CommandRunner>) -> Self {
        match std::env::var(AWS_CLI_ENV) {
            Ok(program) if !program.is_empty() => Self::new(runner).program(program),
            _ => Self::new(runner),
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Call `action` of `service`, filtering the result with the JMESPath
    /// expression `query`.
    pub fn call(
        &self,
        service: &str,
        action: &str,
        arguments: &Value,
        query: Option<&str>,
    ) -> RemoteResult<Value> {
        let mut request = NamedTempFile::new()?;
        let arguments = if arguments.is_null() {
            Value::Object(Map::new())
        } else {
            arguments.clone()
        };
        serde_json::to_writer(&mut request, &arguments)?;
        request.flush()?;

        let service = cli_service_name(service);
        let command = cli_command_name(action);
        let mut config = CommandConfig::argv([self.program.as_str(), service, command.as_str()])
            .arg("--cli-input-json")
            .arg(format!("file://{}", request.path().display()))
            .arg("--output")
            .arg("json");
        if let Some(query) = query {
            config = config.arg("--query").arg(query);
        }

        debug!("aws {} {} {}", service, command, arguments);
        let result = self.runner.run(&config, &RunConfig::captured())?;

        if !result.success() {
            return Err(parse_cli_error(service, &command, result.exit_code, &result.stderr));
        }

        let stdout = result.stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(stdout)?)
    }
}

/// Turn the CLI's stderr into a structured error.
fn parse_cli_error(service: &str, command: &str, exit_code: i32, stderr: &str) -> RemoteError {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"An error occurred \(([^)]+)\) when calling the (\w+) operation: (.*)")
            .expect("static regex")
    });

    match pattern.captures(stderr) {
        Some(caps) => RemoteError::api(service, &caps[2], &caps[1], caps[3].trim()),
        None => {
            let message = stderr.trim();
            RemoteError::api(
                service,
                command,
                format!("ExitCode{}", exit_code),
                if message.is_empty() {
                    format!("aws exited with return code {}", exit_code)
                } else {
                    message.to_string()
                },
            )
        }
    }
}

/// `describe_vpcs` and `DescribeVpcs` both become `describe-vpcs`.
pub fn cli_command_name(action: &str) -> String {
    let chars: Vec<char> = action.chars().collect();
    let mut name = String::with_capacity(action.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' {
            if !name.ends_with('-') && !name.is_empty() {
                name.push('-');
            }
            continue;
        }
        if ch.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).map(|c| c.is_ascii_lowercase()).unwrap_or(false);
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary && !name.ends_with('-') {
                name.push('-');
            }
        }
        name.push(ch.to_ascii_lowercase());
    }
    name
}

/// boto service names that the CLI spells differently.
fn cli_service_name(service: &str) -> &str {
    match service {
        "s3" => "s3api",
        other => other,
    }
}
