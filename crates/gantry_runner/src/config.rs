//! Command configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a command is handed to the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invocation {
    /// A script interpreted by `shell -c`.
    Shell { shell: String, script: String },
    /// An exact argument vector, no shell interpretation.
    Argv(Vec<String>),
}

impl Invocation {
    /// The program that will be spawned.
    pub fn program(&self) -> Option<&str> {
        match self {
            Invocation::Shell { shell, .. } => Some(shell.as_str()),
            Invocation::Argv(argv) => argv.first().map(|s| s.as_str()),
        }
    }

    /// Human readable form, for logs and error messages.
    pub fn display(&self) -> String {
        match self {
            Invocation::Shell { script, .. } => script.clone(),
            Invocation::Argv(argv) => argv
                .iter()
                .map(|arg| {
                    if arg.contains(' ') || arg.is_empty() {
                        format!("'{}'", arg)
                    } else {
                        arg.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// What to run
    pub invocation: Invocation,
    /// Environment variables set on the child, over the inherited ones
    pub env: BTreeMap<String, String>,
    /// Working directory; the parent's when unset
    pub workdir: Option<PathBuf>,
}

impl CommandConfig {
    pub fn shell(shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(Invocation::Shell {
            shell: shell.into(),
            script: script.into(),
        })
    }

    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Invocation::Argv(argv.into_iter().map(Into::into).collect()))
    }

    fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            env: BTreeMap::new(),
            workdir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let Invocation::Argv(argv) = &mut self.invocation {
            argv.push(arg.into());
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

/// What happens to the child's standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Child writes straight to our terminal
    #[default]
    Inherit,
    /// stdout/stderr are captured into the result
    Capture,
}

/// Execution configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub output: OutputMode,
}

impl RunConfig {
    pub fn captured() -> Self {
        Self {
            output: OutputMode::Capture,
        }
    }

    pub fn inherited() -> Self {
        Self {
            output: OutputMode::Inherit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let shell = Invocation::Shell {
            shell: "/bin/sh".to_string(),
            script: "echo hi".to_string(),
        };
        assert_eq!(shell.display(), "echo hi");
        assert_eq!(shell.program(), Some("/bin/sh"));

        let argv = Invocation::Argv(vec!["echo".to_string(), "hello world".to_string()]);
        assert_eq!(argv.display(), "echo 'hello world'");
        assert_eq!(argv.program(), Some("echo"));
    }

    #[test]
    fn test_builder() {
        let config = CommandConfig::argv(["aws", "cloudformation"])
            .arg("describe-stacks")
            .env("AWS_PAGER", "")
            .workdir("/srv/stacks");

        assert_eq!(
            config.invocation,
            Invocation::Argv(vec![
                "aws".to_string(),
                "cloudformation".to_string(),
                "describe-stacks".to_string()
            ])
        );
        assert_eq!(config.env.get("AWS_PAGER"), Some(&String::new()));
        assert_eq!(config.workdir, Some(PathBuf::from("/srv/stacks")));
    }
}
