//! Contracts of the remote APIs gantry talks to.
//!
//! Stacks and the output resolver only see these traits. [`crate::aws`] and
//! [`crate::gcp`] implement them against the real services and
//! [`crate::mock`] records calls for tests.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by remote calls.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The provider rejected the call.
    #[error("An error occurred ({code}) when calling the {operation} operation: {message}")]
    Api {
        service: String,
        operation: String,
        code: String,
        message: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// A request the adapter cannot express for the operation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timed out after {seconds}s waiting for {what}")]
    WaitTimeout { what: String, seconds: u64 },

    #[error("{0}")]
    Credentials(String),

    #[error("Could not run remote command: {0}")]
    Runner(#[from] gantry_runner::RunnerError),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn api(
        service: impl Into<String>,
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            service: service.into(),
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// CloudFormation reports a missing stack as a generic
    /// `ValidationError`; the message is the only signal.
    pub fn is_missing_stack(&self) -> bool {
        match self {
            RemoteError::Api { message, .. } => message.contains("does not exist"),
            RemoteError::NotFound(_) => true,
            _ => false,
        }
    }

    /// The provider's own message, without the operation prefix.
    pub fn provider_message(&self) -> String {
        match self {
            RemoteError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// States the CloudFormation waiters block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitCondition {
    StackCreateComplete,
    StackUpdateComplete,
    StackDeleteComplete,
    ChangeSetCreateComplete,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::StackCreateComplete => "stack-create-complete",
            WaitCondition::StackUpdateComplete => "stack-update-complete",
            WaitCondition::StackDeleteComplete => "stack-delete-complete",
            WaitCondition::ChangeSetCreateComplete => "change-set-create-complete",
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The CloudFormation operations stacks and lookups need.
///
/// Parameter maps use the API's own field names (`StackName`,
/// `TemplateBody`, `Tags`, ...).
pub trait CloudFormationApi: Send + Sync {
    fn validate_template(&self, template_body: &str) -> RemoteResult<()>;

    fn create_stack(&self, params: &Map<String, Value>) -> RemoteResult<()>;

    fn update_stack(&self, params: &Map<String, Value>) -> RemoteResult<()>;

    fn delete_stack(&self, stack_name: &str) -> RemoteResult<()>;

    /// Block until `condition` holds. Waiters are bounded and fail when
    /// exhausted or when the stack reaches a failure state.
    fn wait(
        &self,
        condition: WaitCondition,
        stack_name: &str,
        change_set: Option<&str>,
    ) -> RemoteResult<()>;

    /// `params` carries `ChangeSetName` and `ChangeSetType`.
    fn create_change_set(&self, params: &Map<String, Value>) -> RemoteResult<()>;

    fn describe_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<Value>;

    fn execute_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()>;

    fn delete_change_set(&self, stack_name: &str, change_set: &str) -> RemoteResult<()>;

    /// The live stack description, including `Outputs`.
    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Value>;

    /// The `StackResourceDetail` of one logical resource.
    fn describe_stack_resource(&self, stack_name: &str, logical_id: &str) -> RemoteResult<Value>;
}

/// The Deployment Manager operations deployments and lookups need.
pub trait DeploymentApi: Send + Sync {
    /// Fails with [`RemoteError::NotFound`] when the deployment is missing.
    fn get(&self, project: &str, deployment: &str) -> RemoteResult<Value>;

    fn get_manifest(&self, project: &str, deployment: &str, manifest: &str)
        -> RemoteResult<Value>;

    fn insert(&self, project: &str, body: &Value) -> RemoteResult<Value>;

    fn delete(&self, project: &str, deployment: &str) -> RemoteResult<Value>;
}

/// Generic AWS access: any service action, and S3 object reads.
pub trait AwsApi: Send + Sync {
    /// Call `action` of `service`; `query` is a JMESPath expression applied
    /// to the result.
    fn call(
        &self,
        service: &str,
        action: &str,
        arguments: &Value,
        query: Option<&str>,
    ) -> RemoteResult<Value>;

    /// Body of an S3 object; `extra` holds further `GetObject` parameters.
    fn get_object(&self, bucket: &str, key: &str, extra: &Map<String, Value>)
        -> RemoteResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stack_detection() {
        let err = RemoteError::api(
            "cloudformation",
            "UpdateStack",
            "ValidationError",
            "Stack [app] does not exist",
        );
        assert!(err.is_missing_stack());
        assert_eq!(
            err.to_string(),
            "An error occurred (ValidationError) when calling the UpdateStack operation: Stack [app] does not exist"
        );

        let err = RemoteError::api(
            "cloudformation",
            "UpdateStack",
            "AccessDenied",
            "insufficient permissions",
        );
        assert!(!err.is_missing_stack());
        assert_eq!(err.provider_message(), "insufficient permissions");
    }
}
