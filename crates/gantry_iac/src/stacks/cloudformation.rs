//! CloudFormation stacks.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use super::{key_value_list, take_build_id, take_string, text, StackBackend, StackKind};
use crate::context::{Providers, WaitPolicy};
use crate::error::{IacError, IacResult};
use crate::remote::{CloudFormationApi, RemoteError, WaitCondition};
use crate::review::{ask_decision, ChangeSetDecision, ReviewConsole};

pub const CHANGE_SET_HEADER: &str = "---------- Change Set ----------";
pub const CHANGE_SET_FOOTER: &str = "--------------------------------";

/// A CloudFormation stack and its template.
///
/// Every attribute besides the ones modelled here is forwarded to the API
/// as is (`Capabilities`, `RoleARN`, `NotificationARNs`, ...).
pub struct CloudFormationStack {
    stack_name: String,
    /// YAML text
    template_body: String,
    parameters: Option<Value>,
    tags: Vec<Value>,
    extra: Map<String, Value>,
    cloudformation: Arc<dyn CloudFormationApi>,
    console: Arc<dyn ReviewConsole>,
    wait_policy: WaitPolicy,
}

impl CloudFormationStack {
    pub fn new(mut attributes: Map<String, Value>, providers: &Providers) -> IacResult<Self> {
        let build_id = take_build_id(&mut attributes)?;
        let stack_name = take_string(&mut attributes, "StackName", StackKind::CloudFormation)?;
        let mut parameters = attributes.remove("Parameters");

        let template_body = match attributes.remove("TemplateBody") {
            Some(Value::String(location)) => {
                // template parameters are rendered in, not sent
                let template_params = match parameters.take() {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(params)) => params,
                    Some(_) => {
                        return Err(IacError::configuration(
                            "Parameters must be a mapping when TemplateBody is a template location",
                        ))
                    }
                };
                let template = providers.document_builder().render_nested(
                    &stack_name,
                    &location,
                    &template_params,
                    &build_id,
                )?;
                serde_yaml::to_string(&template)?
            }
            Some(body @ Value::Object(_)) => serde_yaml::to_string(&body)?,
            Some(_) => {
                return Err(IacError::configuration(
                    "TemplateBody must be a mapping or a template location",
                ))
            }
            None => {
                return Err(IacError::configuration(
                    "TemplateBody is required for cloudformation stacks",
                ))
            }
        };

        let tags = key_value_list(attributes.remove("Tags"), "Key", "Value", &build_id)?;

        Ok(Self {
            stack_name,
            template_body,
            parameters,
            tags,
            extra: attributes,
            cloudformation: Arc::clone(&providers.cloudformation),
            console: Arc::clone(&providers.console),
            wait_policy: providers.wait,
        })
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn template_body(&self) -> &str {
        &self.template_body
    }

    pub fn tags(&self) -> &[Value] {
        &self.tags
    }

    /// Everything sent to `CreateStack` and `UpdateStack`.
    pub fn api_params(&self) -> Map<String, Value> {
        let mut params = self.extra.clone();
        params.insert("StackName".to_string(), Value::String(self.stack_name.clone()));
        params.insert(
            "TemplateBody".to_string(),
            Value::String(self.template_body.clone()),
        );
        if let Some(parameters) = &self.parameters {
            params.insert("Parameters".to_string(), parameters.clone());
        }
        params.insert("Tags".to_string(), Value::Array(self.tags.clone()));
        params
    }

    /// `<StackName>-<build id>`, the build id read back from the tags.
    pub fn change_set_name(&self) -> String {
        let build_id = self
            .tags
            .iter()
            .filter(|tag| tag.get("Key").and_then(Value::as_str) == Some("build_id"))
            .filter_map(|tag| tag.get("Value"))
            .last()
            .map(text)
            .unwrap_or_default();
        format!("{}-{}", self.stack_name, build_id)
    }

    fn wait_for(&self, condition: WaitCondition) -> IacResult<()> {
        info!("Waiting for {} on stack {}", condition, self.stack_name);
        self.cloudformation.wait(condition, &self.stack_name, None)?;
        Ok(())
    }

    /// Create a change set, show it and act on the operator's decision.
    fn review_change_set(&self) -> IacResult<ChangeSetDecision> {
        let change_set = self.change_set_name();

        let mut params = self.api_params();
        params.insert("ChangeSetName".to_string(), Value::String(change_set.clone()));
        params.insert("ChangeSetType".to_string(), Value::String("UPDATE".to_string()));
        self.cloudformation.create_change_set(&params)?;
        info!("Created change set {}", change_set);

        std::thread::sleep(self.wait_policy.change_set_delay);
        // CloudFormation has no change-set update waiter; an UPDATE change
        // set is ready for review once it reaches CREATE_COMPLETE.
        self.cloudformation.wait(
            WaitCondition::ChangeSetCreateComplete,
            &self.stack_name,
            Some(&change_set),
        )?;

        let mut description = self
            .cloudformation
            .describe_change_set(&self.stack_name, &change_set)?;
        if let Some(description) = description.as_object_mut() {
            description.remove("ResponseMetadata");
        }

        self.console.show(CHANGE_SET_HEADER);
        self.console.show(&serde_yaml::to_string(&description)?);
        self.console.show(CHANGE_SET_FOOTER);

        let decision = ask_decision(self.console.as_ref(), &change_set)?;
        match decision {
            ChangeSetDecision::Execute => {
                self.console
                    .show(&format!("Executing changeset {}...", change_set));
                self.cloudformation
                    .execute_change_set(&self.stack_name, &change_set)?;
            }
            ChangeSetDecision::Discard => {
                self.console.show(&format!(
                    "Deleting changeset {}. No changes made to stack {}",
                    change_set, self.stack_name
                ));
                self.cloudformation
                    .delete_change_set(&self.stack_name, &change_set)?;
            }
            ChangeSetDecision::Keep => {
                self.console.show(&format!(
                    "Changeset {} unchanged. No changes made to stack {}",
                    change_set, self.stack_name
                ));
            }
        }
        Ok(decision)
    }
}

impl StackBackend for CloudFormationStack {
    fn create(&self, wait: bool) -> IacResult<()> {
        self.validate()?;
        info!("Creating stack {}", self.stack_name);
        self.cloudformation.create_stack(&self.api_params())?;
        if wait {
            self.wait_for(WaitCondition::StackCreateComplete)?;
        }
        Ok(())
    }

    fn delete(&self, wait: bool) -> IacResult<()> {
        info!("Deleting stack {}", self.stack_name);
        self.cloudformation.delete_stack(&self.stack_name)?;
        if wait {
            self.wait_for(WaitCondition::StackDeleteComplete)?;
        }
        Ok(())
    }

    fn update(&self, wait: bool, review: bool) -> IacResult<()> {
        self.validate()?;

        if review {
            let decision = self.review_change_set()?;
            if wait && decision == ChangeSetDecision::Execute {
                self.wait_for(WaitCondition::StackUpdateComplete)?;
            }
            return Ok(());
        }

        info!("Updating stack {}", self.stack_name);
        self.cloudformation.update_stack(&self.api_params())?;
        if wait {
            self.wait_for(WaitCondition::StackUpdateComplete)?;
        }
        Ok(())
    }

    fn upsert(&self, wait: bool, review: bool) -> IacResult<()> {
        match self.update(wait, review) {
            Err(e) if e.is_missing_stack() => {
                info!("Stack {} does not exist, creating it", self.stack_name);
                self.create(wait)
            }
            other => other,
        }
    }

    fn render(&self) -> IacResult<String> {
        let mut rendered = serde_yaml::to_value(self.api_params())?;
        let template: serde_yaml::Value = serde_yaml::from_str(&self.template_body)?;
        if let serde_yaml::Value::Mapping(rendered) = &mut rendered {
            rendered.insert(serde_yaml::Value::from("TemplateBody"), template);
        }
        Ok(serde_yaml::to_string(&rendered)?)
    }

    fn validate(&self) -> IacResult<()> {
        match self.cloudformation.validate_template(&self.template_body) {
            Ok(()) => {
                info!("Template of stack {} is valid", self.stack_name);
                Ok(())
            }
            Err(e @ RemoteError::Api { .. }) => Err(IacError::Validation {
                stack: self.stack_name.clone(),
                message: e.provider_message(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> IacResult<String> {
        let stack = self.cloudformation.describe_stack(&self.stack_name)?;

        let mut outputs = serde_yaml::Mapping::new();
        for output in stack.get("Outputs").and_then(Value::as_array).into_iter().flatten() {
            let key = output.get("OutputKey").map(text).unwrap_or_default();
            let value = output.get("OutputValue").map(text).unwrap_or_default();
            outputs.insert(key.into(), value.into());
        }

        let mut listing = serde_yaml::Mapping::new();
        listing.insert("StackName".into(), self.stack_name.clone().into());
        listing.insert(
            "StackStatus".into(),
            stack.get("StackStatus").map(text).unwrap_or_default().into(),
        );
        listing.insert("Outputs".into(), serde_yaml::Value::Mapping(outputs));
        Ok(serde_yaml::to_string(&listing)?)
    }

    fn default_review(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        CloudFormationCall, MockAws, MockCloudFormation, MockDeployments, ScriptedConsole,
    };
    use gantry_runner::MockRunner;
    use serde_json::json;

    fn providers(cfn: &MockCloudFormation) -> Providers {
        Providers::new(
            Arc::new(cfn.clone()),
            Arc::new(MockDeployments::new()),
            Arc::new(MockAws::new()),
            Arc::new(MockRunner::new()),
        )
        .with_wait_policy(WaitPolicy::immediate(3))
    }

    fn attributes() -> Map<String, Value> {
        match json!({
            "StackName": "app",
            "BuildId": "42",
            "TemplateBody": {"Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}},
            "Tags": {"team": "core"},
            "Capabilities": ["CAPABILITY_IAM"],
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_construction_normalizes_attributes() {
        let cfn = MockCloudFormation::new();
        let stack = CloudFormationStack::new(attributes(), &providers(&cfn)).unwrap();

        assert_eq!(stack.change_set_name(), "app-42");
        let params = stack.api_params();
        assert_eq!(
            params["Tags"],
            json!([{"Key": "team", "Value": "core"}, {"Key": "build_id", "Value": "42"}])
        );
        assert_eq!(params["Capabilities"], json!(["CAPABILITY_IAM"]));
        assert!(!params.contains_key("BuildId"));
        assert!(params["TemplateBody"].as_str().unwrap().contains("AWS::S3::Bucket"));
    }

    #[test]
    fn test_missing_template_body() {
        let cfn = MockCloudFormation::new();
        let mut attributes = attributes();
        attributes.remove("TemplateBody");
        let err = CloudFormationStack::new(attributes, &providers(&cfn))
            .err()
            .unwrap();
        assert!(matches!(err, IacError::Configuration(_)));
    }

    #[test]
    fn test_validation_error_is_bare_message() {
        let cfn = MockCloudFormation::new().fail_on(
            "ValidateTemplate",
            "ValidationError",
            "Template format error: unsupported structure.",
        );
        let stack = CloudFormationStack::new(attributes(), &providers(&cfn)).unwrap();

        let err = stack.create(false).unwrap_err();
        assert_eq!(err.to_string(), "Template format error: unsupported structure.");
        assert_eq!(cfn.count("CreateStack"), 0);
    }

    #[test]
    fn test_create_waits_when_asked() {
        let cfn = MockCloudFormation::new();
        let stack = CloudFormationStack::new(attributes(), &providers(&cfn)).unwrap();
        stack.create(true).unwrap();

        assert_eq!(cfn.operations(), vec!["ValidateTemplate", "CreateStack", "Wait"]);
        assert!(matches!(
            cfn.calls()[2],
            CloudFormationCall::Wait {
                condition: WaitCondition::StackCreateComplete,
                ..
            }
        ));
    }

    #[test]
    fn test_update_without_review_sends_update() {
        let cfn = MockCloudFormation::new().with_stack("app", &[]);
        let stack = CloudFormationStack::new(attributes(), &providers(&cfn)).unwrap();
        stack.update(false, false).unwrap();

        assert_eq!(cfn.operations(), vec!["ValidateTemplate", "UpdateStack"]);
    }

    #[test]
    fn test_keep_leaves_change_set() {
        let cfn = MockCloudFormation::new().with_stack("app", &[]);
        let console = ScriptedConsole::new(["k"]);
        let providers = providers(&cfn).with_console(Arc::new(console.clone()));
        let stack = CloudFormationStack::new(attributes(), &providers).unwrap();

        stack.update(true, true).unwrap();

        assert_eq!(
            cfn.operations(),
            vec!["ValidateTemplate", "CreateChangeSet", "Wait", "DescribeChangeSet"]
        );
        assert_eq!(
            cfn.calls()[2],
            CloudFormationCall::Wait {
                condition: WaitCondition::ChangeSetCreateComplete,
                stack_name: "app".to_string(),
                change_set: Some("app-42".to_string()),
            }
        );
        let shown = console.shown();
        assert_eq!(shown.first().map(String::as_str), Some(CHANGE_SET_HEADER));
        assert!(!shown[1].contains("ResponseMetadata"));
        assert_eq!(
            shown.last().unwrap(),
            "Changeset app-42 unchanged. No changes made to stack app"
        );
    }
}
