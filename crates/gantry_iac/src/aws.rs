//! AWS adapter on the AWS SDK.
//!
//! CloudFormation and S3 requests go through the SDK clients, driven on a
//! current-thread tokio runtime owned by the adapter so callers stay
//! synchronous. Parameter maps use the API's field names and are checked
//! against what each operation accepts before anything is sent. Responses
//! are returned as JSON in the same shape the API documents.
//!
//! Arbitrary service calls made from templates go through [`AwsCli`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_cloudformation::client::Waiters;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudformation::primitives::{DateTime, DateTimeFormat};
use aws_sdk_cloudformation::types::{
    Capability, Change, ChangeAction, ChangeSetStatus, ChangeSetType, ChangeType,
    ExecutionStatus, OnFailure, Output, Parameter, Replacement, ResourceChange, ResourceStatus,
    Stack, StackResourceDetail, StackStatus, Tag,
};
use aws_sdk_s3::types::RequestPayer;
use gantry_runner::CommandRunner;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::aws_cli::AwsCli;
use crate::remote::{AwsApi, CloudFormationApi, RemoteError, RemoteResult, WaitCondition};
use crate::stacks::text;

/// Longest a CloudFormation waiter blocks.
const MAX_WAIT: Duration = Duration::from_secs(3600);

const CREATE_STACK: &str = "CreateStack";
const UPDATE_STACK: &str = "UpdateStack";
const CREATE_CHANGE_SET: &str = "CreateChangeSet";

/// AWS access through the SDK, with the CLI for generic calls.
pub struct AwsClient {
    runtime: Runtime,
    cloudformation: aws_sdk_cloudformation::Client,
    s3: aws_sdk_s3::Client,
    cli: AwsCli,
}

impl AwsClient {
    /// Clients configured from the standard AWS environment: variables,
    /// shared config and credential files, and instance metadata.
    pub fn from_env(runner: Arc<dyn CommandRunner>) -> RemoteResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let config =
            runtime.block_on(aws_config::load_defaults(aws_config::BehaviorVersion::latest()));
        debug!("Loaded AWS configuration for region {:?}", config.region());

        Ok(Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            cli: AwsCli::from_env(runner),
            runtime,
        })
    }

    /// Run one SDK request to completion.
    fn send<T, E, F>(&self, service: &str, operation: &str, request: F) -> RemoteResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: ProvideErrorMetadata + std::error::Error,
    {
        debug!("{} {}", service, operation);
        self.runtime
            .block_on(request)
            .map_err(|err| api_error(service, operation, &err))
    }
}

/// The provider's error code and message, or the whole error chain when the
/// request never got an answer.
fn api_error<E>(service: &str, operation: &str, err: &E) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some(code) => {
            RemoteError::api(service, operation, code, err.message().unwrap_or_default())
        }
        None => RemoteError::api(
            service,
            operation,
            "SdkError",
            DisplayErrorContext(err).to_string(),
        ),
    }
}

fn waited<T, E: std::error::Error>(
    condition: WaitCondition,
    stack_name: &str,
    result: Result<T, E>,
) -> RemoteResult<()> {
    result.map(|_| ()).map_err(|err| {
        RemoteError::api(
            "cloudformation",
            format!("Wait({})", condition),
            "WaiterError",
            format!("{} on {}: {}", condition, stack_name, DisplayErrorContext(&err)),
        )
    })
}

fn invalid(message: impl Into<String>) -> RemoteError {
    RemoteError::InvalidRequest(message.into())
}

/// Fields of `CreateStack`, `UpdateStack` and `CreateChangeSet` requests.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct StackRequest {
    stack_name: Option<String>,
    template_body: Option<String>,
    #[serde(rename = "TemplateURL")]
    template_url: Option<String>,
    use_previous_template: Option<bool>,
    parameters: Option<Value>,
    capabilities: Option<Vec<String>>,
    resource_types: Option<Vec<String>>,
    #[serde(rename = "RoleARN")]
    role_arn: Option<String>,
    #[serde(rename = "NotificationARNs")]
    notification_arns: Option<Vec<String>>,
    tags: Option<Vec<TagEntry>>,
    disable_rollback: Option<bool>,
    timeout_in_minutes: Option<i32>,
    on_failure: Option<String>,
    stack_policy_body: Option<String>,
    #[serde(rename = "StackPolicyURL")]
    stack_policy_url: Option<String>,
    stack_policy_during_update_body: Option<String>,
    #[serde(rename = "StackPolicyDuringUpdateURL")]
    stack_policy_during_update_url: Option<String>,
    enable_termination_protection: Option<bool>,
    client_request_token: Option<String>,
    change_set_name: Option<String>,
    change_set_type: Option<String>,
    description: Option<String>,
    client_token: Option<String>,
    include_nested_stacks: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagEntry {
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterEntry {
    parameter_key: String,
    parameter_value: Option<Value>,
    use_previous_value: Option<bool>,
}

impl StackRequest {
    fn parse(operation: &str, params: &Map<String, Value>) -> RemoteResult<Self> {
        let request: Self = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| invalid(format!("Invalid {} request: {}", operation, e)))?;
        request.check(operation)?;
        Ok(request)
    }

    /// Fail on fields set for an operation that does not take them.
    fn check(&self, operation: &str) -> RemoteResult<()> {
        let fields: &[(&str, bool, &[&str])] = &[
            ("UsePreviousTemplate", self.use_previous_template.is_some(), &[UPDATE_STACK, CREATE_CHANGE_SET]),
            ("DisableRollback", self.disable_rollback.is_some(), &[CREATE_STACK, UPDATE_STACK]),
            ("TimeoutInMinutes", self.timeout_in_minutes.is_some(), &[CREATE_STACK]),
            ("OnFailure", self.on_failure.is_some(), &[CREATE_STACK]),
            ("StackPolicyBody", self.stack_policy_body.is_some(), &[CREATE_STACK, UPDATE_STACK]),
            ("StackPolicyURL", self.stack_policy_url.is_some(), &[CREATE_STACK, UPDATE_STACK]),
            ("StackPolicyDuringUpdateBody", self.stack_policy_during_update_body.is_some(), &[UPDATE_STACK]),
            ("StackPolicyDuringUpdateURL", self.stack_policy_during_update_url.is_some(), &[UPDATE_STACK]),
            ("EnableTerminationProtection", self.enable_termination_protection.is_some(), &[CREATE_STACK]),
            ("ClientRequestToken", self.client_request_token.is_some(), &[CREATE_STACK, UPDATE_STACK]),
            ("ChangeSetName", self.change_set_name.is_some(), &[CREATE_CHANGE_SET]),
            ("ChangeSetType", self.change_set_type.is_some(), &[CREATE_CHANGE_SET]),
            ("Description", self.description.is_some(), &[CREATE_CHANGE_SET]),
            ("ClientToken", self.client_token.is_some(), &[CREATE_CHANGE_SET]),
            ("IncludeNestedStacks", self.include_nested_stacks.is_some(), &[CREATE_CHANGE_SET]),
        ];

        match fields
            .iter()
            .find(|(_, set, accepted)| *set && !accepted.contains(&operation))
        {
            Some((field, _, _)) => Err(invalid(format!("{} does not take {}", operation, field))),
            None => Ok(()),
        }
    }

    fn capabilities(&self) -> Option<Vec<Capability>> {
        self.capabilities
            .as_ref()
            .map(|list| list.iter().map(|c| Capability::from(c.as_str())).collect())
    }

    fn tags(&self) -> RemoteResult<Option<Vec<Tag>>> {
        self.tags
            .as_ref()
            .map(|tags| {
                tags.iter()
                    .map(|tag| {
                        Ok(Tag::builder()
                            .key(&tag.key)
                            .value(text(&tag.value))
                            .build())
                    })
                    .collect()
            })
            .transpose()
    }

    fn parameters(&self) -> RemoteResult<Option<Vec<Parameter>>> {
        let entries = match &self.parameters {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, value)| json!({"ParameterKey": key, "ParameterValue": value}))
                .collect(),
            Some(other) => {
                return Err(invalid(format!(
                    "Parameters must be a list or a mapping, got {}",
                    other
                )))
            }
        };

        entries
            .into_iter()
            .map(|entry| {
                let entry: ParameterEntry = serde_json::from_value(entry)
                    .map_err(|e| invalid(format!("Invalid parameter: {}", e)))?;
                Ok(Parameter::builder()
                    .parameter_key(entry.parameter_key)
                    .set_parameter_value(entry.parameter_value.as_ref().map(text))
                    .set_use_previous_value(entry.use_previous_value)
                    .build())
            })
            .collect::<RemoteResult<Vec<_>>>()
            .map(Some)
    }
}

/// Extra `GetObject` fields, as given in an `s3://` location's query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct ObjectRequest {
    version_id: Option<String>,
    range: Option<String>,
    if_match: Option<String>,
    if_none_match: Option<String>,
    expected_bucket_owner: Option<String>,
    part_number: Option<Value>,
    #[serde(rename = "SSECustomerAlgorithm")]
    sse_customer_algorithm: Option<String>,
    #[serde(rename = "SSECustomerKey")]
    sse_customer_key: Option<String>,
    #[serde(rename = "SSECustomerKeyMD5")]
    sse_customer_key_md5: Option<String>,
    request_payer: Option<String>,
}

impl ObjectRequest {
    fn parse(extra: &Map<String, Value>) -> RemoteResult<Self> {
        serde_json::from_value(Value::Object(extra.clone()))
            .map_err(|e| invalid(format!("Invalid GetObject request: {}", e)))
    }

    fn part_number(&self) -> RemoteResult<Option<i32>> {
        self.part_number
            .as_ref()
            .map(|value| {
                text(value)
                    .parse()
                    .map_err(|_| invalid(format!("PartNumber must be an integer, got {}", value)))
            })
            .transpose()
    }
}

impl CloudFormationApi for AwsClient {
    fn validate_template(&self, template_body: &str) -> RemoteResult<()> {
        let request = self
            .cloudformation
            .validate_template()
            .template_body(template_body)
            .send();
        self.send("cloudformation", "ValidateTemplate", request)?;
        Ok(())
    }

    fn create_stack(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        let request = StackRequest::parse(CREATE_STACK, params)?;
        let call = self
            .cloudformation
            .create_stack()
            .set_parameters(request.parameters()?)
            .set_capabilities(request.capabilities())
            .set_tags(request.tags()?)
            .set_on_failure(request.on_failure.as_deref().map(OnFailure::from))
            .set_stack_name(request.stack_name)
            .set_template_body(request.template_body)
            .set_template_url(request.template_url)
            .set_resource_types(request.resource_types)
            .set_role_arn(request.role_arn)
            .set_notification_arns(request.notification_arns)
            .set_disable_rollback(request.disable_rollback)
            .set_timeout_in_minutes(request.timeout_in_minutes)
            .set_stack_policy_body(request.stack_policy_body)
            .set_stack_policy_url(request.stack_policy_url)
            .set_enable_termination_protection(request.enable_termination_protection)
            .set_client_request_token(request.client_request_token);
        self.send("cloudformation", CREATE_STACK, call.send())?;
        Ok(())
    }

    fn update_stack(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        let request = StackRequest::parse(UPDATE_STACK, params)?;
        let call = self
            .cloudformation
            .update_stack()
            .set_parameters(request.parameters()?)
            .set_capabilities(request.capabilities())
            .set_tags(request.tags()?)
            .set_stack_name(request.stack_name)
            .set_template_body(request.template_body)
            .set_template_url(request.template_url)
            .set_use_previous_template(request.use_previous_template)
            .set_resource_types(request.resource_types)
            .set_role_arn(request.role_arn)
            .set_notification_arns(request.notification_arns)
            .set_disable_rollback(request.disable_rollback)
            .set_stack_policy_body(request.stack_policy_body)
            .set_stack_policy_url(request.stack_policy_url)
            .set_stack_policy_during_update_body(request.stack_policy_during_update_body)
            .set_stack_policy_during_update_url(request.stack_policy_during_update_url)
            .set_client_request_token(request.client_request_token);
        self.send("cloudformation", UPDATE_STACK, call.send())?;
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str) -> RemoteResult<()> {
        let request = self.cloudformation.delete_stack().stack_name(stack_name).send();
        self.send("cloudformation", "DeleteStack", request)?;
        Ok(())
    }

    fn wait(
        &self,
        condition: WaitCondition,
        stack_name: &str,
        change_set: Option<&str>,
    ) -> RemoteResult<()> {
        debug!("Waiting for {} on {}", condition, stack_name);
        let cfn = &self.cloudformation;
        match condition {
            WaitCondition::StackCreateComplete => waited(
                condition,
                stack_name,
                self.runtime.block_on(
                    cfn.wait_until_stack_create_complete()
                        .stack_name(stack_name)
                        .wait(MAX_WAIT),
                ),
            ),
            WaitCondition::StackUpdateComplete => waited(
                condition,
                stack_name,
                self.runtime.block_on(
                    cfn.wait_until_stack_update_complete()
                        .stack_name(stack_name)
                        .wait(MAX_WAIT),
                ),
            ),
            WaitCondition::StackDeleteComplete => waited(
                condition,
                stack_name,
                self.runtime.block_on(
                    cfn.wait_until_stack_delete_complete()
                        .stack_name(stack_name)
                        .wait(MAX_WAIT),
                ),
            ),
            WaitCondition::ChangeSetCreateComplete => waited(
                condition,
                stack_name,
                self.runtime.block_on(
                    cfn.wait_until_change_set_create_complete()
                        .stack_name(stack_name)
                        .set_change_set_name(change_set.map(str::to_string))
                        .wait(MAX_WAIT),
                ),
            ),
        }
    }

    fn create_change_set(&self, params: &Map<String, Value>) -> RemoteResult<()> {
        let request = StackRequest::parse(CREATE_CHANGE_SET, params)?;
        let call = self
            .cloudformation
            .create_change_set()
            .set_parameters(request.parameters()?)
            .set_capabilities(request.capabilities())
            .set_tags(request.tags()?)
            .set_change_set_type(request.change_set_type.as_deref().map(ChangeSetType::from))
            .set_stack_name(request.stack_name)
            .set_template_body(request.template_body)
            .set_template_url(request.template_url)
            .set_use_previous_template(request.use_previous_template)
            .set_resource_types(request.resource_types)
            .set_role_arn(request.role_arn)
            .set_notification_arns(request.notification_arns)
            .set_change_set_name(request.change_set_name)
            .set_description(request.description)
            .set_client_token(request.client_token)
            .set_include_nested_stacks(request.include_nested_stacks);
        self.send("cloudformation", CREATE_CHANGE_SET, call.send())?;
        Ok(())
    }

    fn describe_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<Value> {
        let request = self
            .cloudformation
            .describe_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send();
        let output = self.send("cloudformation", "DescribeChangeSet", request)?;

        Ok(object([
            ("ChangeSetName", output.change_set_name().to_json()),
            ("ChangeSetId", output.change_set_id().to_json()),
            ("StackId", output.stack_id().to_json()),
            ("StackName", output.stack_name().to_json()),
            ("Description", output.description().to_json()),
            ("Parameters", output.parameters().to_json()),
            ("CreationTime", output.creation_time().to_json()),
            ("ExecutionStatus", output.execution_status().to_json()),
            ("Status", output.status().to_json()),
            ("StatusReason", output.status_reason().to_json()),
            ("Capabilities", output.capabilities().to_json()),
            ("Tags", output.tags().to_json()),
            ("Changes", output.changes().to_json()),
        ]))
    }

    fn execute_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()> {
        let request = self
            .cloudformation
            .execute_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send();
        self.send("cloudformation", "ExecuteChangeSet", request)?;
        Ok(())
    }

    fn delete_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()> {
        let request = self
            .cloudformation
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send();
        self.send("cloudformation", "DeleteChangeSet", request)?;
        Ok(())
    }

    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Value> {
        let request = self.cloudformation.describe_stacks().stack_name(stack_name).send();
        let output = self.send("cloudformation", "DescribeStacks", request)?;

        match output.stacks.unwrap_or_default().first() {
            Some(stack) => Ok(stack.to_json()),
            None => Err(RemoteError::api(
                "cloudformation",
                "DescribeStacks",
                "ValidationError",
                format!("Stack with id {} does not exist", stack_name),
            )),
        }
    }

    fn describe_stack_resource(&self, stack_name: &str, logical_id: &str) -> RemoteResult<Value> {
        let request = self
            .cloudformation
            .describe_stack_resource()
            .stack_name(stack_name)
            .logical_resource_id(logical_id)
            .send();
        let output = self.send("cloudformation", "DescribeStackResource", request)?;
        Ok(output.stack_resource_detail().to_json())
    }
}

impl AwsApi for AwsClient {
    fn call(
        &self,
        service: &str,
        action: &str,
        arguments: &Value,
        query: Option<&str>,
    ) -> RemoteResult<Value> {
        self.cli.call(service, action, arguments, query)
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        extra: &Map<String, Value>,
    ) -> RemoteResult<String> {
        let request = ObjectRequest::parse(extra)?;
        let call = self
            .s3
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_part_number(request.part_number()?)
            .set_request_payer(request.request_payer.as_deref().map(RequestPayer::from))
            .set_version_id(request.version_id)
            .set_range(request.range)
            .set_if_match(request.if_match)
            .set_if_none_match(request.if_none_match)
            .set_expected_bucket_owner(request.expected_bucket_owner)
            .set_sse_customer_algorithm(request.sse_customer_algorithm)
            .set_sse_customer_key(request.sse_customer_key)
            .set_sse_customer_key_md5(request.sse_customer_key_md5);

        let output = self.send("s3", "GetObject", call.send())?;
        let body = self
            .runtime
            .block_on(output.body.collect())
            .map_err(|e| RemoteError::api("s3", "GetObject", "BodyError", e.to_string()))?
            .into_bytes();

        String::from_utf8(body.to_vec()).map_err(|_| {
            RemoteError::api(
                "s3",
                "GetObject",
                "InvalidBody",
                format!("s3://{}/{} is not UTF-8 text", bucket, key),
            )
        })
    }
}

/// SDK response values as the JSON the API documents.
trait ToJson {
    fn to_json(self) -> Value;
}

/// An object of the non-null fields.
fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

impl<T: ToJson> ToJson for Option<T> {
    fn to_json(self) -> Value {
        self.map(ToJson::to_json).unwrap_or(Value::Null)
    }
}

impl<'a, T> ToJson for &'a [T]
where
    &'a T: ToJson,
{
    fn to_json(self) -> Value {
        Value::Array(self.iter().map(ToJson::to_json).collect())
    }
}

impl ToJson for &str {
    fn to_json(self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToJson for bool {
    fn to_json(self) -> Value {
        Value::Bool(self)
    }
}

impl ToJson for &DateTime {
    fn to_json(self) -> Value {
        self.fmt(DateTimeFormat::DateTime)
            .map(Value::String)
            .unwrap_or(Value::Null)
    }
}

macro_rules! enum_to_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToJson for &$ty {
                fn to_json(self) -> Value {
                    Value::String(self.as_str().to_string())
                }
            }
        )*
    };
}

enum_to_json!(
    Capability,
    ChangeAction,
    ChangeSetStatus,
    ChangeType,
    ExecutionStatus,
    Replacement,
    ResourceStatus,
    StackStatus,
);

impl ToJson for &Stack {
    fn to_json(self) -> Value {
        object([
            ("StackId", self.stack_id().to_json()),
            ("StackName", self.stack_name().to_json()),
            ("Description", self.description().to_json()),
            ("Parameters", self.parameters().to_json()),
            ("CreationTime", self.creation_time().to_json()),
            ("LastUpdatedTime", self.last_updated_time().to_json()),
            ("StackStatus", self.stack_status().to_json()),
            ("StackStatusReason", self.stack_status_reason().to_json()),
            ("Capabilities", self.capabilities().to_json()),
            ("Outputs", self.outputs().to_json()),
            ("Tags", self.tags().to_json()),
        ])
    }
}

impl ToJson for &Output {
    fn to_json(self) -> Value {
        object([
            ("OutputKey", self.output_key().to_json()),
            ("OutputValue", self.output_value().to_json()),
            ("Description", self.description().to_json()),
            ("ExportName", self.export_name().to_json()),
        ])
    }
}

impl ToJson for &Parameter {
    fn to_json(self) -> Value {
        object([
            ("ParameterKey", self.parameter_key().to_json()),
            ("ParameterValue", self.parameter_value().to_json()),
            ("UsePreviousValue", self.use_previous_value().to_json()),
            ("ResolvedValue", self.resolved_value().to_json()),
        ])
    }
}

impl ToJson for &Tag {
    fn to_json(self) -> Value {
        object([("Key", self.key().to_json()), ("Value", self.value().to_json())])
    }
}

impl ToJson for &Change {
    fn to_json(self) -> Value {
        object([
            ("Type", self.r#type().to_json()),
            ("ResourceChange", self.resource_change().to_json()),
        ])
    }
}

impl ToJson for &ResourceChange {
    fn to_json(self) -> Value {
        object([
            ("Action", self.action().to_json()),
            ("LogicalResourceId", self.logical_resource_id().to_json()),
            ("PhysicalResourceId", self.physical_resource_id().to_json()),
            ("ResourceType", self.resource_type().to_json()),
            ("Replacement", self.replacement().to_json()),
        ])
    }
}

impl ToJson for &StackResourceDetail {
    fn to_json(self) -> Value {
        object([
            ("StackName", self.stack_name().to_json()),
            ("StackId", self.stack_id().to_json()),
            ("LogicalResourceId", self.logical_resource_id().to_json()),
            ("PhysicalResourceId", self.physical_resource_id().to_json()),
            ("ResourceType", self.resource_type().to_json()),
            ("LastUpdatedTimestamp", self.last_updated_timestamp().to_json()),
            ("ResourceStatus", self.resource_status().to_json()),
            ("ResourceStatusReason", self.resource_status_reason().to_json()),
            ("Description", self.description().to_json()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::error::ErrorMetadata;
    use aws_sdk_cloudformation::operation::update_stack::UpdateStackError;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_stack_request_fields() {
        let request = StackRequest::parse(
            CREATE_STACK,
            &params(json!({
                "StackName": "app",
                "TemplateBody": "Resources: {}",
                "TemplateURL": "https://example.com/t.yaml",
                "RoleARN": "arn:aws:iam::1:role/deploy",
                "Capabilities": ["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"],
                "Parameters": [
                    {"ParameterKey": "Size", "ParameterValue": 3},
                    {"ParameterKey": "Env", "UsePreviousValue": true},
                ],
                "Tags": [{"Key": "build_id", "Value": "42"}],
                "OnFailure": "DELETE",
            })),
        )
        .unwrap();

        assert_eq!(request.stack_name.as_deref(), Some("app"));
        assert_eq!(request.template_url.as_deref(), Some("https://example.com/t.yaml"));
        assert_eq!(request.role_arn.as_deref(), Some("arn:aws:iam::1:role/deploy"));
        assert_eq!(
            request.capabilities(),
            Some(vec![Capability::CapabilityIam, Capability::CapabilityNamedIam])
        );

        let parameters = request.parameters().unwrap().unwrap();
        assert_eq!(parameters[0].parameter_key(), Some("Size"));
        assert_eq!(parameters[0].parameter_value(), Some("3"));
        assert_eq!(parameters[1].use_previous_value(), Some(true));

        let tags = request.tags().unwrap().unwrap();
        assert_eq!(tags[0].key(), "build_id");
        assert_eq!(tags[0].value(), "42");
    }

    #[test]
    fn test_parameters_from_mapping() {
        let request = StackRequest::parse(
            UPDATE_STACK,
            &params(json!({"StackName": "app", "Parameters": {"Size": "3"}})),
        )
        .unwrap();
        let parameters = request.parameters().unwrap().unwrap();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters[0].parameter_key(), Some("Size"));
        assert_eq!(parameters[0].parameter_value(), Some("3"));
    }

    #[test]
    fn test_fields_outside_the_operation_are_rejected() {
        let err = StackRequest::parse(
            CREATE_CHANGE_SET,
            &params(json!({"StackName": "app", "OnFailure": "DELETE"})),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: CreateChangeSet does not take OnFailure");

        let err = StackRequest::parse(
            CREATE_STACK,
            &params(json!({"StackName": "app", "ChangeSetName": "app-1"})),
        )
        .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidRequest(_)));

        let err = StackRequest::parse(UPDATE_STACK, &params(json!({"StackNme": "app"})))
            .unwrap_err();
        assert!(err.to_string().contains("StackNme"));
    }

    #[test]
    fn test_object_request_fields() {
        let request = ObjectRequest::parse(&params(json!({
            "VersionId": "v3",
            "PartNumber": "2",
            "SSECustomerKeyMD5": "abc",
        })))
        .unwrap();
        assert_eq!(request.version_id.as_deref(), Some("v3"));
        assert_eq!(request.part_number().unwrap(), Some(2));
        assert_eq!(request.sse_customer_key_md5.as_deref(), Some("abc"));

        let err = ObjectRequest::parse(&params(json!({"Acl": "private"}))).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidRequest(_)));
    }

    #[test]
    fn test_api_error_uses_provider_code_and_message() {
        let err = UpdateStackError::generic(
            ErrorMetadata::builder()
                .code("ValidationError")
                .message("Stack [app] does not exist")
                .build(),
        );
        let err = api_error("cloudformation", UPDATE_STACK, &err);
        match &err {
            RemoteError::Api {
                operation,
                code,
                message,
                ..
            } => {
                assert_eq!(operation, UPDATE_STACK);
                assert_eq!(code, "ValidationError");
                assert_eq!(message, "Stack [app] does not exist");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_missing_stack());

        let err = UpdateStackError::generic(ErrorMetadata::builder().build());
        let err = api_error("cloudformation", UPDATE_STACK, &err);
        assert!(matches!(err, RemoteError::Api { ref code, .. } if code == "SdkError"));
        assert!(!err.is_missing_stack());
    }

    #[test]
    fn test_outputs_as_json() {
        let outputs = vec![
            Output::builder()
                .output_key("VpcId")
                .output_value("vpc-123")
                .build(),
            Output::builder()
                .output_key("Arn")
                .output_value("arn:1")
                .export_name("shared-arn")
                .build(),
        ];
        assert_eq!(
            outputs.as_slice().to_json(),
            json!([
                {"OutputKey": "VpcId", "OutputValue": "vpc-123"},
                {"OutputKey": "Arn", "OutputValue": "arn:1", "ExportName": "shared-arn"},
            ])
        );
    }

    #[test]
    fn test_change_as_json() {
        let change = Change::builder()
            .r#type(ChangeType::Resource)
            .resource_change(
                ResourceChange::builder()
                    .action(ChangeAction::Modify)
                    .logical_resource_id("Bucket")
                    .physical_resource_id("app-bucket-1")
                    .resource_type("AWS::S3::Bucket")
                    .replacement(Replacement::False)
                    .build(),
            )
            .build();
        assert_eq!(
            (&change).to_json(),
            json!({
                "Type": "Resource",
                "ResourceChange": {
                    "Action": "Modify",
                    "LogicalResourceId": "Bucket",
                    "PhysicalResourceId": "app-bucket-1",
                    "ResourceType": "AWS::S3::Bucket",
                    "Replacement": "False",
                },
            })
        );
    }
}
