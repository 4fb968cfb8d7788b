//! Stack backends and the factory choosing between them.

mod cloudformation;
mod deployment;
mod shell;

pub use cloudformation::{CloudFormationStack, CHANGE_SET_FOOTER, CHANGE_SET_HEADER};
pub use deployment::DeploymentStack;
pub use shell::{ShellAction, ShellCommand, ShellStack, DEFAULT_SHELL};

use std::fmt;

use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Providers;
use crate::document::{StackDocument, BUILD_ID_KEY};
use crate::error::{IacError, IacResult};

/// Lifecycle verbs every backend answers.
pub trait StackBackend {
    fn create(&self, wait: bool) -> IacResult<()>;

    fn delete(&self, wait: bool) -> IacResult<()>;

    /// `review` is only honoured by backends that support it.
    fn update(&self, wait: bool, review: bool) -> IacResult<()>;

    /// Update, or create when the stack does not exist yet.
    fn upsert(&self, wait: bool, review: bool) -> IacResult<()>;

    /// YAML of the fully resolved backend state. Never changes remote state.
    fn render(&self) -> IacResult<String>;

    fn validate(&self) -> IacResult<()>;

    /// Read-only description of what is deployed.
    fn list(&self) -> IacResult<String>;

    /// Whether updates are reviewed when the caller does not say.
    fn default_review(&self) -> bool {
        false
    }
}

/// The backend kinds a document can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    CloudFormation,
    Shell,
    Deployment,
}

impl StackKind {
    /// Discriminator keys, in precedence order.
    pub const KEYS: [&'static str; 4] = ["StackType", "stack_type", "Type", "type"];

    pub fn as_str(&self) -> &'static str {
        match self {
            StackKind::CloudFormation => "cloudformation",
            StackKind::Shell => "shell",
            StackKind::Deployment => "gcp",
        }
    }

    pub fn from_name(name: &str) -> IacResult<Self> {
        match name.to_lowercase().as_str() {
            "cloudformation" => Ok(StackKind::CloudFormation),
            "shell" => Ok(StackKind::Shell),
            "gcp" => Ok(StackKind::Deployment),
            other => Err(IacError::configuration(format!(
                "Stack type not supported: {}",
                other
            ))),
        }
    }

    /// Remove the first discriminator present in `attributes`; CloudFormation
    /// when there is none.
    pub fn take_from(attributes: &mut Map<String, Value>) -> IacResult<Self> {
        for key in Self::KEYS {
            if let Some(value) = attributes.remove(key) {
                return match value {
                    Value::String(name) => Self::from_name(&name),
                    other => Err(IacError::configuration(format!(
                        "Stack type not supported: {}",
                        other
                    ))),
                };
            }
        }
        Ok(StackKind::CloudFormation)
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A constructed backend.
pub enum Stack {
    CloudFormation(CloudFormationStack),
    Shell(ShellStack),
    Deployment(DeploymentStack),
}

impl Stack {
    /// Build the backend the document asks for.
    pub fn from_document(document: StackDocument, providers: &Providers) -> IacResult<Self> {
        let mut attributes = into_attributes(document)?;
        let kind = StackKind::take_from(&mut attributes)?;
        debug!("Stack type is {}", kind);

        Ok(match kind {
            StackKind::CloudFormation => {
                Stack::CloudFormation(CloudFormationStack::new(attributes, providers)?)
            }
            StackKind::Shell => Stack::Shell(ShellStack::new(attributes, providers.runner.clone())?),
            StackKind::Deployment => Stack::Deployment(DeploymentStack::new(attributes, providers)?),
        })
    }

    pub fn kind(&self) -> StackKind {
        match self {
            Stack::CloudFormation(_) => StackKind::CloudFormation,
            Stack::Shell(_) => StackKind::Shell,
            Stack::Deployment(_) => StackKind::Deployment,
        }
    }

    fn backend(&self) -> &dyn StackBackend {
        match self {
            Stack::CloudFormation(stack) => stack,
            Stack::Shell(stack) => stack,
            Stack::Deployment(stack) => stack,
        }
    }
}

impl StackBackend for Stack {
    fn create(&self, wait: bool) -> IacResult<()> {
        self.backend().create(wait)
    }

    fn delete(&self, wait: bool) -> IacResult<()> {
        self.backend().delete(wait)
    }

    fn update(&self, wait: bool, review: bool) -> IacResult<()> {
        self.backend().update(wait, review)
    }

    fn upsert(&self, wait: bool, review: bool) -> IacResult<()> {
        self.backend().upsert(wait, review)
    }

    fn render(&self) -> IacResult<String> {
        self.backend().render()
    }

    fn validate(&self) -> IacResult<()> {
        self.backend().validate()
    }

    fn list(&self) -> IacResult<String> {
        self.backend().list()
    }

    fn default_review(&self) -> bool {
        self.backend().default_review()
    }
}

/// The document as JSON attributes, keyed by string.
pub(crate) fn into_attributes(document: StackDocument) -> IacResult<Map<String, Value>> {
    match serde_json::to_value(&document)? {
        Value::Object(attributes) => Ok(attributes),
        _ => Err(IacError::configuration("Stack document must be a mapping")),
    }
}

pub(crate) fn take_build_id(attributes: &mut Map<String, Value>) -> IacResult<String> {
    match attributes.remove(BUILD_ID_KEY) {
        Some(value) if !text(&value).is_empty() => Ok(text(&value)),
        _ => Err(IacError::configuration(
            "The build ID is required. Use -b option or set BUILD_ID",
        )),
    }
}

/// Required non-empty string attribute.
pub(crate) fn take_string(
    attributes: &mut Map<String, Value>,
    key: &str,
    kind: StackKind,
) -> IacResult<String> {
    match attributes.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(IacError::configuration(format!(
            "{} is required for {} stacks",
            key, kind
        ))),
    }
}

/// Scalars as text; compound values as JSON.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalize tags or labels to `[{key_field: k, value_field: v}]` and append
/// the build id entry.
///
/// A mapping becomes one entry per key. A list is taken as already
/// normalized.
pub(crate) fn key_value_list(
    value: Option<Value>,
    key_field: &str,
    value_field: &str,
    build_id: &str,
) -> IacResult<Vec<Value>> {
    let entry = |key: &str, value: String| {
        let mut entry = Map::new();
        entry.insert(key_field.to_string(), Value::String(key.to_string()));
        entry.insert(value_field.to_string(), Value::String(value));
        Value::Object(entry)
    };

    let mut entries = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| entry(k, text(v))).collect(),
        Some(Value::Array(list)) => {
            for item in &list {
                if item.get(key_field).is_none() {
                    return Err(IacError::configuration(format!(
                        "Every entry needs a '{}' field: {}",
                        key_field, item
                    )));
                }
            }
            list
        }
        Some(other) => {
            return Err(IacError::configuration(format!(
                "Expected a mapping or a list of {}/{} pairs, got {}",
                key_field, value_field, other
            )))
        }
    };

    entries.push(entry("build_id", build_id.to_string()));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_value_list_from_mapping() {
        let tags = key_value_list(Some(json!({"team": "core", "tier": 2})), "Key", "Value", "42")
            .unwrap();
        assert_eq!(
            tags,
            vec![
                json!({"Key": "team", "Value": "core"}),
                json!({"Key": "tier", "Value": "2"}),
                json!({"Key": "build_id", "Value": "42"}),
            ]
        );
    }

    #[test]
    fn test_key_value_list_from_list_and_absent() {
        let labels = key_value_list(
            Some(json!([{"key": "env", "value": "dev"}])),
            "key",
            "value",
            "7",
        )
        .unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1], json!({"key": "build_id", "value": "7"}));

        let none = key_value_list(None, "key", "value", "7").unwrap();
        assert_eq!(none, vec![json!({"key": "build_id", "value": "7"})]);

        assert!(key_value_list(Some(json!("env=dev")), "key", "value", "7").is_err());
    }

    #[test]
    fn test_discriminator_precedence() {
        let mut attributes = Map::new();
        attributes.insert("type".to_string(), json!("gcp"));
        attributes.insert("StackType".to_string(), json!("Shell"));

        assert_eq!(StackKind::take_from(&mut attributes).unwrap(), StackKind::Shell);
        assert!(!attributes.contains_key("StackType"));
        assert!(attributes.contains_key("type"));

        assert_eq!(
            StackKind::take_from(&mut Map::new()).unwrap(),
            StackKind::CloudFormation
        );
    }

    #[test]
    fn test_unknown_stack_type() {
        let err = StackKind::from_name("terraform").unwrap_err();
        assert_eq!(err.to_string(), "Stack type not supported: terraform");
    }
}
