//! CLI command definitions.
//!
//! `gantry <action> <stack>` builds the stack document, picks its backend
//! and runs one lifecycle action against it.

use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::warn;

use gantry_iac::{Providers, Stack, StackSource};
use gantry_templates::Dialect;

pub mod lifecycle;
pub mod render;

/// gantry - render and deploy infrastructure stacks
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(version, about = "gantry - render and deploy infrastructure stacks")]
#[command(long_about = r#"
gantry renders a templated stack document and drives its lifecycle on
CloudFormation, Deployment Manager or local shell commands.

ACTIONS:
  create    → Create the stack
  delete    → Delete the stack
  update    → Update the stack, reviewing a change set where supported
  upsert    → Update the stack, or create it when it does not exist
  validate  → Validate the template remotely
  render    → Print the rendered document and the final template
  list      → Print what is deployed

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error
  3 - Validation failure
  4 - Template error
  5 - Remote API error
  A failing shell command exits with the command's own code.
"#)]
pub struct Cli {
    /// Lifecycle action
    #[arg(value_enum)]
    pub action: Action,

    /// Stack file, or - to read standard input
    pub stack: String,

    /// Templating engine of the stack file; required for standard input
    #[arg(short = 't', long, value_enum)]
    pub templating_engine: Option<Engine>,

    /// Wait for the remote operation to finish
    #[arg(short, long)]
    pub wait: bool,

    /// Review changes before updating
    #[arg(short, long, conflicts_with = "no_review")]
    pub review: bool,

    /// Update without reviewing changes
    #[arg(long)]
    pub no_review: bool,

    /// Build identifier stamped on the stack
    #[arg(short, long, env = "BUILD_ID", default_value = "")]
    pub build_id: String,

    /// Log level of gantry
    #[arg(short, long, env = "GANTRY_LOGLEVEL", value_enum, default_value = "error")]
    pub loglevel: LogLevel,

    /// Log level of the remote API adapters
    #[arg(long = "botocore-loglevel", alias = "remote-loglevel", value_enum, default_value = "error")]
    pub remote_loglevel: LogLevel,

    /// Accepted for compatibility; has no effect
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// `Some` when review was set explicitly.
    pub fn review_override(&self) -> Option<bool> {
        if self.review {
            Some(true)
        } else if self.no_review {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Create,
    Delete,
    List,
    Render,
    Update,
    Upsert,
    Validate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Render => "render",
            Action::Update => "update",
            Action::Upsert => "upsert",
            Action::Validate => "validate",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    Mako,
    Jinja,
    #[value(alias = "none")]
    Yaml,
}

impl From<Engine> for Dialect {
    fn from(engine: Engine) -> Self {
        match engine {
            Engine::Mako => Dialect::Mako,
            Engine::Jinja => Dialect::Jinja,
            Engine::Yaml => Dialect::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[value(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Level name as a tracing filter directive.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Build the stack and run the requested action, writing any report to
/// `out`.
pub fn execute(cli: &Cli, providers: &Providers, out: &mut dyn Write) -> Result<()> {
    if cli.dry_run {
        warn!("--dry-run has no effect");
    }

    let source = StackSource::read(&cli.stack)?;
    let document = providers
        .document_builder()
        .build(&source, cli.templating_engine.map(Dialect::from), &cli.build_id)?;
    let stack = Stack::from_document(document.clone(), providers)?;

    match cli.action {
        Action::Render => render::render(&document, &stack, out),
        Action::List => render::list(&stack, out),
        action => lifecycle::run(action, &stack, cli.wait, cli.review_override())
            .with_context(|| format!("Failed to {} stack {}", action, cli.stack)),
    }
}
