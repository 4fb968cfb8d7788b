//! gantry CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error
//! - 3: Validation failure
//! - 4: Template error
//! - 5: Remote API error
//! - a failing shell command's own exit code

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gantry_iac::{IacError, Providers};
use gantry_templates::TemplateError;

mod commands;

use commands::{Cli, LogLevel};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIGURATION_ERROR: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
    pub const REMOTE_ERROR: u8 = 5;
}

/// Targets logged at the remote log level.
const REMOTE_TARGETS: [&str; 5] = [
    "gantry_iac::aws",
    "gantry_iac::gcp",
    "aws_sdk_cloudformation",
    "aws_sdk_s3",
    "reqwest",
];

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(log_filter(cli.loglevel, cli.remote_loglevel))
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = Providers::from_env()
        .map_err(anyhow::Error::from)
        .and_then(|providers| commands::execute(&cli, &providers, &mut std::io::stdout().lock()));

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Environment directives, then gantry and remote adapter levels.
fn log_filter(level: LogLevel, remote_level: LogLevel) -> EnvFilter {
    let mut directives = vec![format!("gantry={}", level.directive())];
    directives.extend(
        REMOTE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, remote_level.directive())),
    );

    directives
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Exit code for an error, from the first gantry error in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(error) = cause.downcast_ref::<IacError>() {
            return match error {
                IacError::Configuration(_) => ExitCodes::CONFIGURATION_ERROR,
                IacError::Validation { .. } => ExitCodes::VALIDATION_FAILURE,
                IacError::Template(_) => ExitCodes::TEMPLATE_ERROR,
                IacError::Remote(_) => ExitCodes::REMOTE_ERROR,
                IacError::CommandFailed { code, .. } => u8::try_from(*code)
                    .ok()
                    .filter(|code| *code != 0)
                    .unwrap_or(ExitCodes::GENERAL_ERROR),
                IacError::ReviewAborted { .. }
                | IacError::Runner(_)
                | IacError::Io(_)
                | IacError::Yaml(_)
                | IacError::Json(_) => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<TemplateError>().is_some() {
            return ExitCodes::TEMPLATE_ERROR;
        }
    }
    ExitCodes::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use gantry_iac::RemoteError;

    fn code(error: IacError) -> u8 {
        categorize_error(&anyhow::Error::new(error))
    }

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(code(IacError::configuration("bad")), ExitCodes::CONFIGURATION_ERROR);
        assert_eq!(
            code(IacError::Validation {
                stack: "app".to_string(),
                message: "Template format error".to_string(),
            }),
            ExitCodes::VALIDATION_FAILURE
        );
        assert_eq!(
            code(TemplateError::render("a.mako", "undefined name `x`").into()),
            ExitCodes::TEMPLATE_ERROR
        );
        assert_eq!(
            code(RemoteError::NotFound("gone".to_string()).into()),
            ExitCodes::REMOTE_ERROR
        );
    }

    #[test]
    fn test_shell_failure_keeps_child_code() {
        let failed = |exit: i32| IacError::CommandFailed {
            action: "Create".to_string(),
            command: "make".to_string(),
            code: exit,
        };
        assert_eq!(code(failed(3)), 3);
        assert_eq!(code(failed(-1)), ExitCodes::GENERAL_ERROR);
        assert_eq!(code(failed(256)), ExitCodes::GENERAL_ERROR);
    }

    #[test]
    fn test_context_does_not_hide_category() {
        let result: anyhow::Result<()> = Err(IacError::configuration("Stack type not supported: x"))
            .context("Failed to create stack app.yaml");
        assert_eq!(
            categorize_error(&result.unwrap_err()),
            ExitCodes::CONFIGURATION_ERROR
        );

        let plain = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&plain), ExitCodes::GENERAL_ERROR);
    }
}
