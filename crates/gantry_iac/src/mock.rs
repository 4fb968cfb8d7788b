//! Recording test doubles for the remote APIs and the review console.
//!
//! Each mock is cheap to clone and clones share state, so a test can hand
//! one copy to [`crate::Providers`] and inspect the other afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::error::IacResult;
use crate::remote::{
    AwsApi, CloudFormationApi, DeploymentApi, RemoteError, RemoteResult, WaitCondition,
};
use crate::review::ReviewConsole;

/// One call made against [`MockCloudFormation`].
#[derive(Debug, Clone, PartialEq)]
pub enum CloudFormationCall {
    ValidateTemplate {
        template_body: String,
    },
    CreateStack(Map<String, Value>),
    UpdateStack(Map<String, Value>),
    DeleteStack {
        stack_name: String,
    },
    Wait {
        condition: WaitCondition,
        stack_name: String,
        change_set: Option<String>,
    },
    CreateChangeSet(Map<String, Value>),
    DescribeChangeSet {
        stack_name: String,
        change_set: String,
    },
    ExecuteChangeSet {
        stack_name: String,
        change_set: String,
    },
    DeleteChangeSet {
        stack_name: String,
        change_set: String,
    },
    DescribeStack {
        stack_name: String,
    },
    DescribeStackResource {
        stack_name: String,
        logical_id: String,
    },
}

impl CloudFormationCall {
    /// API operation name, as used by [`MockCloudFormation::fail_on`].
    pub fn operation(&self) -> &'static str {
        match self {
            CloudFormationCall::ValidateTemplate { .. } => "ValidateTemplate",
            CloudFormationCall::CreateStack(_) => "CreateStack",
            CloudFormationCall::UpdateStack(_) => "UpdateStack",
            CloudFormationCall::DeleteStack { .. } => "DeleteStack",
            CloudFormationCall::Wait { .. } => "Wait",
            CloudFormationCall::CreateChangeSet(_) => "CreateChangeSet",
            CloudFormationCall::DescribeChangeSet { .. } => "DescribeChangeSet",
            CloudFormationCall::ExecuteChangeSet { .. } => "ExecuteChangeSet",
            CloudFormationCall::DeleteChangeSet { .. } => "DeleteChangeSet",
            CloudFormationCall::DescribeStack { .. } => "DescribeStacks",
            CloudFormationCall::DescribeStackResource { .. } => "DescribeStackResource",
        }
    }

    /// True for calls that change remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            CloudFormationCall::CreateStack(_)
                | CloudFormationCall::UpdateStack(_)
                | CloudFormationCall::DeleteStack { .. }
                | CloudFormationCall::CreateChangeSet(_)
                | CloudFormationCall::ExecuteChangeSet { .. }
                | CloudFormationCall::DeleteChangeSet { .. }
        )
    }
}

/// In-memory CloudFormation.
///
/// Stacks created through the mock exist afterwards; updating a stack that
/// does not exist fails the way the real service does.
#[derive(Clone, Default)]
pub struct MockCloudFormation {
    stacks: Arc<RwLock<HashMap<String, Value>>>,
    resources: Arc<RwLock<HashMap<(String, String), String>>>,
    change_set: Arc<RwLock<Option<Value>>>,
    failures: Arc<RwLock<HashMap<String, (String, String)>>>,
    calls: Arc<RwLock<Vec<CloudFormationCall>>>,
}

impl MockCloudFormation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A live stack with the given outputs.
    pub fn with_stack(self, stack_name: &str, outputs: &[(&str, &str)]) -> Self {
        let outputs: Vec<Value> = outputs
            .iter()
            .map(|(key, value)| json!({"OutputKey": key, "OutputValue": value}))
            .collect();
        self.stacks.write().insert(
            stack_name.to_string(),
            json!({"StackName": stack_name, "StackStatus": "CREATE_COMPLETE", "Outputs": outputs}),
        );
        self
    }

    pub fn with_resource(self, stack_name: &str, logical_id: &str, physical_id: &str) -> Self {
        self.resources.write().insert(
            (stack_name.to_string(), logical_id.to_string()),
            physical_id.to_string(),
        );
        self
    }

    /// The `DescribeChangeSet` response.
    pub fn with_change_set(self, description: Value) -> Self {
        *self.change_set.write() = Some(description);
        self
    }

    /// Fail every call of `operation` with a provider error.
    pub fn fail_on(self, operation: &str, code: &str, message: &str) -> Self {
        self.failures.write().insert(
            operation.to_string(),
            (code.to_string(), message.to_string()),
        );
        self
    }

    pub fn calls(&self) -> Vec<CloudFormationCall> {
        self.calls.read().clone()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.calls.read().iter().map(|c| c.operation()).collect()
    }

    /// Number of calls of `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub fn mutating_calls(&self) -> Vec<CloudFormationCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn has_stack(&self, stack_name: &str) -> bool {
        self.stacks.read().contains_key(stack_name)
    }

    fn record(&self, call: CloudFormationCall) -> RemoteResult<()> {
        let operation = call.operation();
        self.calls.write().push(call);

        match self.failures.read().get(operation) {
            Some((code, message)) => Err(RemoteError::api(
                "cloudformation",
                operation,
                code.as_str(),
                message.as_str(),
            )),
            None => Ok(()),
        }
    }

    fn missing_stack(operation: &str, stack_name: &str) -> RemoteError {
        RemoteError::api(
            "cloudformation",
            operation,
            "ValidationError",
            format!("Stack with id {} does not exist", stack_name),
        )
    }
}

fn stack_name_of(params: &Map<String, Value>) -> String {
    params
        .get("StackName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl CloudFormationApi for MockCloudFormation {
    fn validate_template(&self, template_body: &str) -> RemoteResult<()> {
        self.record(CloudFormationCall::ValidateTemplate {
            template_body: template_body.to_string(),
        })
    }

    fn create_stack(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        self.record(CloudFormationCall::CreateStack(params.clone()))?;
        let name = stack_name_of(params);
        self.stacks.write().insert(
            name.clone(),
            json!({"StackName": name, "StackStatus": "CREATE_COMPLETE", "Outputs": []}),
        );
        Ok(())
    }

    fn update_stack(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        self.record(CloudFormationCall::UpdateStack(params.clone()))?;
        let name = stack_name_of(params);
        if !self.has_stack(&name) {
            return Err(Self::missing_stack("UpdateStack", &name));
        }
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str) -> RemoteResult<()> {
        self.record(CloudFormationCall::DeleteStack {
            stack_name: stack_name.to_string(),
        })?;
        self.stacks.write().remove(stack_name);
        Ok(())
    }

    fn wait(
        &self,
        condition: WaitCondition,
        stack_name: &str,
        change_set: Option<&str>,
    ) -> RemoteResult<()> {
        self.record(CloudFormationCall::Wait {
            condition,
            stack_name: stack_name.to_string(),
            change_set: change_set.map(str::to_string),
        })
    }

    fn create_change_set(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        self.record(CloudFormationCall::CreateChangeSet(params.clone()))?;
        let name = stack_name_of(params);
        let is_update = params.get("ChangeSetType").and_then(Value::as_str) == Some("UPDATE");
        if is_update && !self.has_stack(&name) {
            return Err(Self::missing_stack("CreateChangeSet", &name));
        }
        Ok(())
    }

    fn describe_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<Value> {
        self.record(CloudFormationCall::DescribeChangeSet {
            stack_name: stack_name.to_string(),
            change_set: change_set.to_string(),
        })?;
        Ok(self.change_set.read().clone().unwrap_or_else(|| {
            json!({
                "ChangeSetName": change_set,
                "StackName": stack_name,
                "Status": "CREATE_COMPLETE",
                "Changes": [],
                "ResponseMetadata": {"HTTPStatusCode": 200},
            })
        }))
    }

    fn execute_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()> {
        self.record(CloudFormationCall::ExecuteChangeSet {
            stack_name: stack_name.to_string(),
            change_set: change_set.to_string(),
        })
    }

    fn delete_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()> {
        self.record(CloudFormationCall::DeleteChangeSet {
            stack_name: stack_name.to_string(),
            change_set: change_set.to_string(),
        })
    }

    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Value> {
        self.record(CloudFormationCall::DescribeStack {
            stack_name: stack_name.to_string(),
        })?;
        self.stacks
            .read()
            .get(stack_name)
            .cloned()
            .ok_or_else(|| Self::missing_stack("DescribeStacks", stack_name))
    }

    fn describe_stack_resource(&self, stack_name: &str, logical_id: &str) -> RemoteResult<Value> {
        self.record(CloudFormationCall::DescribeStackResource {
            stack_name: stack_name.to_string(),
            logical_id: logical_id.to_string(),
        })?;
        let resources = self.resources.read();
        match resources.get(&(stack_name.to_string(), logical_id.to_string())) {
            Some(physical) => Ok(json!({
                "StackName": stack_name,
                "LogicalResourceId": logical_id,
                "PhysicalResourceId": physical,
            })),
            None => Err(RemoteError::api(
                "cloudformation",
                "DescribeStackResource",
                "ValidationError",
                format!("Resource {} does not exist for stack {}", logical_id, stack_name),
            )),
        }
    }
}

/// One call made against [`MockDeployments`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentCall {
    Get { project: String, deployment: String },
    GetManifest { project: String, deployment: String, manifest: String },
    Insert { project: String, body: Value },
    Delete { project: String, deployment: String },
}

impl DeploymentCall {
    pub fn is_mutating(&self) -> bool {
        matches!(self, DeploymentCall::Insert { .. } | DeploymentCall::Delete { .. })
    }
}

/// In-memory Deployment Manager.
///
/// Inserted deployments report a finished operation unless
/// [`MockDeployments::never_finish`] is set; deleted ones disappear.
#[derive(Clone, Default)]
pub struct MockDeployments {
    deployments: Arc<RwLock<HashMap<(String, String), Value>>>,
    manifests: Arc<RwLock<HashMap<(String, String, String), Value>>>,
    pending: Arc<RwLock<bool>>,
    calls: Arc<RwLock<Vec<DeploymentCall>>>,
}

impl MockDeployments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(self, project: &str, deployment: Value) -> Self {
        let name = deployment
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.deployments
            .write()
            .insert((project.to_string(), name), deployment);
        self
    }

    /// A finished deployment whose manifest layout declares `outputs`.
    pub fn with_outputs(self, project: &str, deployment: &str, outputs: &[(&str, Value)]) -> Self {
        let manifest = format!("manifest-{}", deployment);
        let outputs: Vec<Value> = outputs
            .iter()
            .map(|(name, value)| json!({"name": name, "finalValue": value}))
            .collect();
        let layout = serde_yaml::to_string(&json!({"resources": [], "outputs": outputs}))
            .unwrap_or_default();

        self.manifests.write().insert(
            (project.to_string(), deployment.to_string(), manifest.clone()),
            json!({"name": manifest, "layout": layout}),
        );
        self.with_deployment(
            project,
            json!({
                "name": deployment,
                "manifest": format!(
                    "https://www.googleapis.com/deploymentmanager/v2/projects/{}/global/deployments/{}/manifests/{}",
                    project, deployment, manifest
                ),
                "operation": {"status": "DONE"},
            }),
        )
    }

    /// Inserted deployments stay `RUNNING` forever.
    pub fn never_finish(self) -> Self {
        *self.pending.write() = true;
        self
    }

    pub fn calls(&self) -> Vec<DeploymentCall> {
        self.calls.read().clone()
    }

    pub fn mutating_calls(&self) -> Vec<DeploymentCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn get_count(&self) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| matches!(c, DeploymentCall::Get { .. }))
            .count()
    }

    fn not_found(project: &str, deployment: &str) -> RemoteError {
        RemoteError::NotFound(format!(
            "The object 'projects/{}/global/deployments/{}' is not found.",
            project, deployment
        ))
    }
}

impl DeploymentApi for MockDeployments {
    fn get(&self, project: &str, deployment: &str) -> RemoteResult<Value> {
        self.calls.write().push(DeploymentCall::Get {
            project: project.to_string(),
            deployment: deployment.to_string(),
        });
        self.deployments
            .read()
            .get(&(project.to_string(), deployment.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(project, deployment))
    }

    fn get_manifest(
        &self,
        project: &str,
        deployment: &str,
        manifest: &str,
    ) -> RemoteResult<Value> {
        self.calls.write().push(DeploymentCall::GetManifest {
            project: project.to_string(),
            deployment: deployment.to_string(),
            manifest: manifest.to_string(),
        });
        self.manifests
            .read()
            .get(&(project.to_string(), deployment.to_string(), manifest.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("Manifest {} not found", manifest)))
    }

    fn insert(&self, project: &str, body: &Value) -> RemoteResult<Value> {
        self.calls.write().push(DeploymentCall::Insert {
            project: project.to_string(),
            body: body.clone(),
        });

        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = if *self.pending.read() { "RUNNING" } else { "DONE" };
        let mut stored = body.clone();
        if let Some(object) = stored.as_object_mut() {
            object.insert("operation".to_string(), json!({"status": status}));
        }
        self.deployments
            .write()
            .insert((project.to_string(), name.clone()), stored);

        Ok(json!({"name": format!("operation-insert-{}", name), "status": "PENDING"}))
    }

    fn delete(&self, project: &str, deployment: &str) -> RemoteResult<Value> {
        self.calls.write().push(DeploymentCall::Delete {
            project: project.to_string(),
            deployment: deployment.to_string(),
        });
        self.deployments
            .write()
            .remove(&(project.to_string(), deployment.to_string()))
            .ok_or_else(|| Self::not_found(project, deployment))?;
        Ok(json!({"name": format!("operation-delete-{}", deployment), "status": "PENDING"}))
    }
}

/// One call made against [`MockAws`].
#[derive(Debug, Clone, PartialEq)]
pub struct AwsCall {
    pub service: String,
    pub action: String,
    pub arguments: Value,
    pub query: Option<String>,
}

/// Canned AWS responses keyed by service and action.
#[derive(Clone, Default)]
pub struct MockAws {
    responses: Arc<RwLock<HashMap<(String, String), Value>>>,
    objects: Arc<RwLock<HashMap<(String, String), String>>>,
    calls: Arc<RwLock<Vec<AwsCall>>>,
}

impl MockAws {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, service: &str, action: &str, response: Value) -> Self {
        self.responses
            .write()
            .insert((service.to_string(), action.to_string()), response);
        self
    }

    pub fn with_object(self, bucket: &str, key: &str, body: &str) -> Self {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), body.to_string());
        self
    }

    pub fn calls(&self) -> Vec<AwsCall> {
        self.calls.read().clone()
    }
}

impl AwsApi for MockAws {
    fn call(
        &self,
        service: &str,
        action: &str,
        arguments: &Value,
        query: Option<&str>,
    ) -> RemoteResult<Value> {
        self.calls.write().push(AwsCall {
            service: service.to_string(),
            action: action.to_string(),
            arguments: arguments.clone(),
            query: query.map(str::to_string),
        });
        self.responses
            .read()
            .get(&(service.to_string(), action.to_string()))
            .cloned()
            .ok_or_else(|| {
                RemoteError::api(
                    service,
                    action,
                    "InvalidAction",
                    format!("no response configured for {}.{}", service, action),
                )
            })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        _extra: &Map<String, Value>,
    ) -> RemoteResult<String> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                RemoteError::api("s3", "GetObject", "NoSuchKey", "The specified key does not exist.")
            })
    }
}

/// Review console answering from a script.
///
/// Returns `None` (closed input) once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedConsole {
    answers: Arc<RwLock<VecDeque<String>>>,
    prompts: Arc<AtomicUsize>,
    shown: Arc<RwLock<Vec<String>>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Arc::new(RwLock::new(answers.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    /// Number of prompts issued.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Everything displayed, in order.
    pub fn shown(&self) -> Vec<String> {
        self.shown.read().clone()
    }
}

impl ReviewConsole for ScriptedConsole {
    fn show(&self, text: &str) {
        self.shown.write().push(text.to_string());
    }

    fn ask(&self, _prompt: &str) -> IacResult<Option<String>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.write().pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_of_unknown_stack_fails() {
        let cfn = MockCloudFormation::new();
        let mut params = Map::new();
        params.insert("StackName".to_string(), json!("app"));

        let err = cfn.update_stack(&params).unwrap_err();
        assert!(err.is_missing_stack());

        cfn.create_stack(&params).unwrap();
        cfn.update_stack(&params).unwrap();
        assert_eq!(cfn.operations(), vec!["UpdateStack", "CreateStack", "UpdateStack"]);
    }

    #[test]
    fn test_deployment_lifecycle() {
        let dm = MockDeployments::new();
        assert!(matches!(dm.get("p", "d"), Err(RemoteError::NotFound(_))));

        dm.insert("p", &json!({"name": "d"})).unwrap();
        assert_eq!(dm.get("p", "d").unwrap()["operation"]["status"], "DONE");

        dm.delete("p", "d").unwrap();
        assert!(dm.get("p", "d").is_err());
        assert_eq!(dm.mutating_calls().len(), 2);
    }
}
