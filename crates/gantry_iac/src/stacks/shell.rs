//! Stacks made of local shell commands.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gantry_runner::{CommandConfig, CommandRunner, RunConfig};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use super::{take_build_id, text, StackBackend};
use crate::error::{IacError, IacResult};

pub const DEFAULT_SHELL: &str = "/bin/sh";

/// What an action runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ShellCommand {
    /// Interpreted by the stack's shell.
    Script(String),
    /// Spawned as is.
    Argv(Vec<String>),
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellCommand::Script(script) => write!(f, "{}", script),
            ShellCommand::Argv(argv) => write!(f, "{}", argv.join(" ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellAction {
    #[serde(rename = "Commands")]
    pub command: ShellCommand,
    #[serde(rename = "Environment", skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Overrides the stack's working directory
    #[serde(rename = "WorkingDirectory", skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Create, update and delete as local commands.
pub struct ShellStack {
    shell: String,
    environment: BTreeMap<String, String>,
    working_directory: Option<String>,
    actions: BTreeMap<String, ShellAction>,
    build_id: String,
    runner: Arc<dyn CommandRunner>,
}

impl ShellStack {
    /// Script placeholders are expanded against the process environment.
    pub fn new(attributes: Map<String, Value>, runner: Arc<dyn CommandRunner>) -> IacResult<Self> {
        Self::with_env(attributes, runner, |name| std::env::var(name).ok())
    }

    /// Like [`ShellStack::new`] with `lookup` standing in for the process
    /// environment.
    pub fn with_env<F>(
        mut attributes: Map<String, Value>,
        runner: Arc<dyn CommandRunner>,
        lookup: F,
    ) -> IacResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let build_id = take_build_id(&mut attributes)?;
        let shell = match attributes.remove("Shell") {
            Some(Value::String(shell)) if !shell.is_empty() => shell,
            _ => DEFAULT_SHELL.to_string(),
        };
        let environment = string_map(attributes.remove("Environment"), "Environment")?;
        let working_directory = working_directory(attributes.remove("WorkingDirectory"), &lookup)?;

        let mut actions = BTreeMap::new();
        match attributes.remove("Actions") {
            Some(Value::Object(declared)) => {
                for (name, action) in declared {
                    let action = parse_action(&name, action, &lookup)?;
                    actions.insert(name, action);
                }
            }
            None | Some(Value::Null) => {
                return Err(IacError::configuration(
                    "Actions are required for shell stacks",
                ))
            }
            Some(_) => {
                return Err(IacError::configuration(
                    "Actions of a shell stack must be a mapping",
                ))
            }
        }

        Ok(Self {
            shell,
            environment,
            working_directory,
            actions,
            build_id,
            runner,
        })
    }

    pub fn action(&self, name: &str) -> Option<&ShellAction> {
        self.actions.get(name)
    }

    fn run_action(&self, name: &str) -> IacResult<()> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| IacError::configuration(format!("Action not available: {}", name)))?;

        let mut config = match &action.command {
            ShellCommand::Script(script) => CommandConfig::shell(&self.shell, script),
            ShellCommand::Argv(argv) => CommandConfig::argv(argv.clone()),
        }
        .envs(self.environment.clone())
        .envs(action.environment.clone())
        .env("BUILD_ID", &self.build_id);
        if let Some(dir) = action.working_directory.as_ref().or(self.working_directory.as_ref()) {
            config = config.workdir(dir);
        }

        info!("Running {} action: {}", name, action.command);
        let result = self.runner.run(&config, &RunConfig::inherited())?;

        if !result.success() {
            error!(
                "Command {} exited with return code {}",
                action.command, result.exit_code
            );
            return Err(IacError::CommandFailed {
                action: name.to_string(),
                command: action.command.to_string(),
                code: result.exit_code,
            });
        }
        Ok(())
    }
}

fn parse_action<F>(name: &str, action: Value, lookup: &F) -> IacResult<ShellAction>
where
    F: Fn(&str) -> Option<String>,
{
    let mut action = match action {
        Value::Object(action) => action,
        _ => {
            return Err(IacError::configuration(format!(
                "Action {} must be a mapping",
                name
            )))
        }
    };

    let empty = || IacError::configuration("At least one command must be specified in a shell stack");
    let command = match action.remove("Commands") {
        Some(Value::String(script)) if !script.trim().is_empty() => {
            let expanded = shellexpand::env_with_context_no_errors(&script, |var| lookup(var));
            ShellCommand::Script(expanded.into_owned())
        }
        Some(Value::Array(argv)) if !argv.is_empty() => {
            ShellCommand::Argv(argv.iter().map(text).collect())
        }
        _ => return Err(empty()),
    };

    Ok(ShellAction {
        command,
        environment: string_map(action.remove("Environment"), "Environment")?,
        working_directory: working_directory(action.remove("WorkingDirectory"), lookup)?,
    })
}

/// A `WorkingDirectory` value, with placeholders expanded like scripts.
fn working_directory<F>(value: Option<Value>, lookup: &F) -> IacResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(dir)) if !dir.is_empty() => Ok(Some(
            shellexpand::env_with_context_no_errors(&dir, |var| lookup(var)).into_owned(),
        )),
        Some(other) => Err(IacError::configuration(format!(
            "WorkingDirectory must be a path, got {}",
            other
        ))),
    }
}

fn string_map(value: Option<Value>, what: &str) -> IacResult<BTreeMap<String, String>> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), text(v))).collect()),
        Some(_) => Err(IacError::configuration(format!("{} must be a mapping", what))),
    }
}

impl StackBackend for ShellStack {
    fn create(&self, _wait: bool) -> IacResult<()> {
        self.run_action("Create")
    }

    fn delete(&self, _wait: bool) -> IacResult<()> {
        self.run_action("Delete")
    }

    fn update(&self, _wait: bool, _review: bool) -> IacResult<()> {
        self.run_action("Update")
    }

    fn upsert(&self, _wait: bool, _review: bool) -> IacResult<()> {
        if self.actions.contains_key("Update") {
            self.run_action("Update")
        } else {
            self.run_action("Create")
        }
    }

    fn render(&self) -> IacResult<String> {
        let mut rendered = serde_yaml::Mapping::new();
        rendered.insert("Shell".into(), self.shell.clone().into());
        if let Some(dir) = &self.working_directory {
            rendered.insert("WorkingDirectory".into(), dir.clone().into());
        }
        if !self.environment.is_empty() {
            rendered.insert("Environment".into(), serde_yaml::to_value(&self.environment)?);
        }
        rendered.insert("Actions".into(), serde_yaml::to_value(&self.actions)?);
        Ok(serde_yaml::to_string(&rendered)?)
    }

    fn validate(&self) -> IacResult<()> {
        info!("Nothing to validate for shell stacks");
        Ok(())
    }

    fn list(&self) -> IacResult<String> {
        let names: Vec<&String> = self.actions.keys().collect();
        Ok(serde_yaml::to_string(&names)?)
    }
}
