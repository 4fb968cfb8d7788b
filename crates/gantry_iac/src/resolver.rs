//! Cross-stack output and resource resolution.
//!
//! Lookups are memoized for the lifetime of the resolver, which is one
//! invocation: the first lookup against a stack fetches it, later lookups
//! against the same stack are served from the cache even for other keys.
//! Entries are never refreshed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gantry_templates::{OutputLookup, RemoteCall, TemplateError, TemplateHelpers, TemplateResult};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{IacError, IacResult};
use crate::remote::{AwsApi, CloudFormationApi, DeploymentApi};

/// Which registry an output lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputProvider {
    CloudFormation,
    /// A Deployment Manager deployment in `project`.
    Deployment { project: String },
}

impl OutputProvider {
    /// Provider from the names templates use (`cloudformation`, `gcp`).
    pub fn from_name(name: Option<&str>, project: Option<&str>) -> IacResult<Self> {
        match name.map(|n| n.to_lowercase()).as_deref() {
            None | Some("cloudformation") => Ok(OutputProvider::CloudFormation),
            Some("gcp") => match project {
                Some(project) if !project.is_empty() => Ok(OutputProvider::Deployment {
                    project: project.to_string(),
                }),
                _ => Err(IacError::configuration(
                    "A project is required to look up gcp deployment outputs",
                )),
            },
            Some(other) => Err(IacError::configuration(format!(
                "Output provider not supported: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputProvider::CloudFormation => write!(f, "cloudformation"),
            OutputProvider::Deployment { project } => write!(f, "gcp ({})", project),
        }
    }
}

/// Caching lookup of other stacks' outputs and resources.
pub struct OutputResolver {
    cloudformation: Arc<dyn CloudFormationApi>,
    deployments: Arc<dyn DeploymentApi>,
    aws: Arc<dyn AwsApi>,
    /// Stack name to its `Outputs` list.
    stack_outputs: Mutex<HashMap<String, Vec<Value>>>,
    /// (project, deployment) to the manifest layout outputs.
    deployment_outputs: Mutex<HashMap<(String, String), Vec<Value>>>,
    /// (stack, logical id) to physical id.
    resources: Mutex<HashMap<(String, String), String>>,
}

impl OutputResolver {
    pub fn new(
        cloudformation: Arc<dyn CloudFormationApi>,
        deployments: Arc<dyn DeploymentApi>,
        aws: Arc<dyn AwsApi>,
    ) -> Self {
        Self {
            cloudformation,
            deployments,
            aws,
            stack_outputs: Mutex::new(HashMap::new()),
            deployment_outputs: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Value of `output_key` in `stack_name`, or `""` when the stack has no
    /// such output.
    pub fn resolve_output(
        &self,
        stack_name: &str,
        output_key: &str,
        provider: &OutputProvider,
    ) -> IacResult<String> {
        match provider {
            OutputProvider::CloudFormation => {
                let mut cache = self.stack_outputs.lock();
                if !cache.contains_key(stack_name) {
                    debug!("Fetching outputs of stack {}", stack_name);
                    let stack = self.cloudformation.describe_stack(stack_name)?;
                    let outputs = stack
                        .get("Outputs")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    cache.insert(stack_name.to_string(), outputs);
                }

                Ok(find_value(&cache[stack_name], "OutputKey", output_key, "OutputValue"))
            }
            OutputProvider::Deployment { project } => {
                let key = (project.clone(), stack_name.to_string());
                let mut cache = self.deployment_outputs.lock();
                if !cache.contains_key(&key) {
                    let outputs = self.fetch_deployment_outputs(project, stack_name)?;
                    cache.insert(key.clone(), outputs);
                }

                Ok(find_value(&cache[&key], "name", output_key, "finalValue"))
            }
        }
    }

    /// Physical id of `resource_id` in `stack_name`.
    pub fn resolve_resource(&self, stack_name: &str, resource_id: &str) -> IacResult<String> {
        let key = (stack_name.to_string(), resource_id.to_string());
        let mut cache = self.resources.lock();
        if let Some(physical) = cache.get(&key) {
            return Ok(physical.clone());
        }

        debug!("Fetching resource {} of stack {}", resource_id, stack_name);
        let detail = self
            .cloudformation
            .describe_stack_resource(stack_name, resource_id)?;
        let physical = detail
            .get("PhysicalResourceId")
            .map(scalar_text)
            .unwrap_or_default();
        cache.insert(key, physical.clone());
        Ok(physical)
    }

    /// Forward an arbitrary AWS call. Not cached.
    pub fn call_remote_api(
        &self,
        service: &str,
        action: &str,
        arguments: &Value,
        result_filter: Option<&str>,
    ) -> IacResult<Value> {
        debug!("Calling {}.{}", service, action);
        Ok(self.aws.call(service, action, arguments, result_filter)?)
    }

    fn fetch_deployment_outputs(&self, project: &str, deployment: &str) -> IacResult<Vec<Value>> {
        debug!("Fetching manifest of deployment {}/{}", project, deployment);
        let found = self.deployments.get(project, deployment)?;
        let manifest_name = found
            .get("manifest")
            .and_then(Value::as_str)
            .and_then(|m| m.rsplit('/').next())
            .ok_or_else(|| {
                IacError::configuration(format!("Deployment {} has no manifest", deployment))
            })?
            .to_string();

        let manifest = self
            .deployments
            .get_manifest(project, deployment, &manifest_name)?;
        let layout: Value = match manifest.get("layout").and_then(Value::as_str) {
            Some(layout) => serde_yaml::from_str(layout)?,
            None => Value::Null,
        };

        Ok(layout
            .get("outputs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// In a list of objects, the `value_field` of the first whose `key_field`
/// equals `key`.
fn find_value(entries: &[Value], key_field: &str, key: &str, value_field: &str) -> String {
    entries
        .iter()
        .find(|entry| entry.get(key_field).and_then(Value::as_str) == Some(key))
        .and_then(|entry| entry.get(value_field))
        .map(scalar_text)
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TemplateHelpers for OutputResolver {
    fn stack_output(&self, lookup: &OutputLookup) -> TemplateResult<String> {
        let provider = OutputProvider::from_name(lookup.provider.as_deref(), lookup.project.as_deref())
            .map_err(|e| TemplateError::helper("get_stack_output", e))?;
        self.resolve_output(&lookup.stack, &lookup.output, &provider)
            .map_err(|e| TemplateError::helper("get_stack_output", e))
    }

    fn stack_resource(&self, stack: &str, resource_id: &str) -> TemplateResult<String> {
        self.resolve_resource(stack, resource_id)
            .map_err(|e| TemplateError::helper("get_stack_resource", e))
    }

    fn call_remote(&self, call: &RemoteCall) -> TemplateResult<Value> {
        self.call_remote_api(
            &call.service,
            &call.action,
            &call.arguments,
            call.result_filter.as_deref(),
        )
        .map_err(|e| TemplateError::helper("call_aws", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names() {
        assert_eq!(
            OutputProvider::from_name(None, None).unwrap(),
            OutputProvider::CloudFormation
        );
        assert_eq!(
            OutputProvider::from_name(Some("gcp"), Some("p1")).unwrap(),
            OutputProvider::Deployment {
                project: "p1".to_string()
            }
        );
        assert!(OutputProvider::from_name(Some("gcp"), None).is_err());
        assert!(OutputProvider::from_name(Some("azure"), None).is_err());
    }

    #[test]
    fn test_find_value() {
        let outputs = vec![
            serde_json::json!({"OutputKey": "VpcId", "OutputValue": "vpc-123"}),
            serde_json::json!({"OutputKey": "Port", "OutputValue": 443}),
        ];
        assert_eq!(find_value(&outputs, "OutputKey", "VpcId", "OutputValue"), "vpc-123");
        assert_eq!(find_value(&outputs, "OutputKey", "Port", "OutputValue"), "443");
        assert_eq!(find_value(&outputs, "OutputKey", "SubnetId", "OutputValue"), "");
    }
}
