//! Lookup functions visible to templates.
//!
//! Templates can read outputs and resources of other stacks and make
//! arbitrary remote API calls while they render. The functions are the same
//! in every dialect; only the call syntax differs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TemplateError, TemplateResult};

/// A request for another stack's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLookup {
    pub stack: String,
    pub output: String,
    /// `cloudformation` (default) or `gcp`
    pub provider: Option<String>,
    /// Required by the `gcp` provider
    pub project: Option<String>,
}

/// An arbitrary remote API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub service: String,
    pub action: String,
    pub arguments: Value,
    /// JMESPath expression applied to the raw result
    pub result_filter: Option<String>,
}

/// Backing implementation of the template helper functions.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateHelpers: Send + Sync {
    fn stack_output(&self, lookup: &OutputLookup) -> TemplateResult<String>;

    fn stack_resource(&self, stack: &str, resource_id: &str) -> TemplateResult<String>;

    fn call_remote(&self, call: &RemoteCall) -> TemplateResult<Value>;
}

/// Helpers for rendering without remote access; every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHelpers;

impl TemplateHelpers for NoHelpers {
    fn stack_output(&self, lookup: &OutputLookup) -> TemplateResult<String> {
        Err(TemplateError::helper(
            "get_stack_output",
            format!("no remote access to resolve {}.{}", lookup.stack, lookup.output),
        ))
    }

    fn stack_resource(&self, stack: &str, resource_id: &str) -> TemplateResult<String> {
        Err(TemplateError::helper(
            "get_stack_resource",
            format!("no remote access to resolve {}.{}", stack, resource_id),
        ))
    }

    fn call_remote(&self, call: &RemoteCall) -> TemplateResult<Value> {
        Err(TemplateError::helper(
            "call_aws",
            format!("no remote access for {}.{}", call.service, call.action),
        ))
    }
}

/// The helper functions a template may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperFunction {
    StackOutput,
    StackResource,
    CallRemote,
}

/// Parameter names, each with an optional short alias.
const OUTPUT_PARAMS: &[(&str, Option<&str>)] = &[
    ("stack_name", Some("stack")),
    ("output_key", Some("output")),
    ("provider", None),
    ("project", None),
];
const RESOURCE_PARAMS: &[(&str, Option<&str>)] =
    &[("stack_name", Some("stack")), ("resource_id", Some("resource"))];
const CALL_PARAMS: &[(&str, Option<&str>)] = &[
    ("service", None),
    ("action", None),
    ("arguments", None),
    ("result_filter", None),
];

impl HelperFunction {
    /// Every name a helper is published under.
    pub const NAMES: &'static [(&'static str, HelperFunction)] = &[
        ("get_stack_output", HelperFunction::StackOutput),
        ("resolve_output", HelperFunction::StackOutput),
        ("get_stack_resource", HelperFunction::StackResource),
        ("resolve_resource", HelperFunction::StackResource),
        ("call_aws", HelperFunction::CallRemote),
        ("call_remote_api", HelperFunction::CallRemote),
    ];

    pub fn lookup(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, function)| *function)
    }

    fn params(&self) -> &'static [(&'static str, Option<&'static str>)] {
        match self {
            HelperFunction::StackOutput => OUTPUT_PARAMS,
            HelperFunction::StackResource => RESOURCE_PARAMS,
            HelperFunction::CallRemote => CALL_PARAMS,
        }
    }

    /// Bind the arguments and run the helper.
    pub fn invoke(
        &self,
        name: &str,
        helpers: &dyn TemplateHelpers,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> TemplateResult<Value> {
        let mut args = bind(name, self.params(), positional, keywords)?;

        match self {
            HelperFunction::StackOutput => {
                let lookup = OutputLookup {
                    stack: required_string(name, &mut args, 0)?,
                    output: required_string(name, &mut args, 1)?,
                    provider: optional_string(name, &mut args, 2)?,
                    project: optional_string(name, &mut args, 3)?,
                };
                helpers.stack_output(&lookup).map(Value::String)
            }
            HelperFunction::StackResource => {
                let stack = required_string(name, &mut args, 0)?;
                let resource_id = required_string(name, &mut args, 1)?;
                helpers
                    .stack_resource(&stack, &resource_id)
                    .map(Value::String)
            }
            HelperFunction::CallRemote => {
                let call = RemoteCall {
                    service: required_string(name, &mut args, 0)?,
                    action: required_string(name, &mut args, 1)?,
                    arguments: args[2]
                        .take()
                        .filter(|v| !v.is_null())
                        .unwrap_or_else(|| Value::Object(Default::default())),
                    result_filter: optional_string(name, &mut args, 3)?,
                };
                helpers.call_remote(&call)
            }
        }
    }
}

fn bind(
    name: &str,
    params: &[(&str, Option<&str>)],
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> TemplateResult<Vec<Option<Value>>> {
    if positional.len() > params.len() {
        return Err(TemplateError::helper(
            name,
            format!(
                "takes at most {} arguments ({} given)",
                params.len(),
                positional.len()
            ),
        ));
    }

    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in positional.into_iter().enumerate() {
        bound[slot] = Some(value);
    }

    for (key, value) in keywords {
        let slot = params
            .iter()
            .position(|(param, alias)| *param == key || *alias == Some(key.as_str()))
            .ok_or_else(|| {
                TemplateError::helper(name, format!("unexpected keyword argument `{}`", key))
            })?;
        if bound[slot].is_some() {
            return Err(TemplateError::helper(
                name,
                format!("got multiple values for argument `{}`", params[slot].0),
            ));
        }
        bound[slot] = Some(value);
    }

    Ok(bound)
}

fn required_string(name: &str, args: &mut [Option<Value>], slot: usize) -> TemplateResult<String> {
    optional_string(name, args, slot)?.ok_or_else(|| {
        let param = match HelperFunction::lookup(name).map(|f| f.params()) {
            Some(params) => params[slot].0,
            None => "argument",
        };
        TemplateError::helper(name, format!("missing required argument `{}`", param))
    })
}

fn optional_string(
    name: &str,
    args: &mut [Option<Value>],
    slot: usize,
) -> TemplateResult<Option<String>> {
    match args[slot].take() {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(TemplateError::helper(
            name,
            format!("expected a string argument, got {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_positional_output_lookup() {
        let mut helpers = MockTemplateHelpers::new();
        helpers
            .expect_stack_output()
            .withf(|lookup| {
                lookup.stack == "vpc-stack"
                    && lookup.output == "VpcId"
                    && lookup.provider.is_none()
                    && lookup.project.is_none()
            })
            .times(1)
            .returning(|_| Ok("vpc-123".to_string()));

        let value = HelperFunction::StackOutput
            .invoke(
                "get_stack_output",
                &helpers,
                vec![json!("vpc-stack"), json!("VpcId")],
                vec![],
            )
            .unwrap();
        assert_eq!(value, json!("vpc-123"));
    }

    #[test]
    fn test_keyword_aliases_bind() {
        let mut helpers = MockTemplateHelpers::new();
        helpers
            .expect_stack_output()
            .withf(|lookup| {
                lookup.stack == "net"
                    && lookup.output == "Subnet"
                    && lookup.provider.as_deref() == Some("gcp")
                    && lookup.project.as_deref() == Some("my-project")
            })
            .returning(|_| Ok("subnet-1".to_string()));

        let value = HelperFunction::StackOutput
            .invoke(
                "resolve_output",
                &helpers,
                vec![],
                vec![
                    ("stack".to_string(), json!("net")),
                    ("output".to_string(), json!("Subnet")),
                    ("provider".to_string(), json!("gcp")),
                    ("project".to_string(), json!("my-project")),
                ],
            )
            .unwrap();
        assert_eq!(value, json!("subnet-1"));
    }

    #[test]
    fn test_call_remote_defaults_arguments() {
        let mut helpers = MockTemplateHelpers::new();
        helpers
            .expect_call_remote()
            .withf(|call| {
                call.service == "ec2"
                    && call.action == "describe_vpcs"
                    && call.arguments == json!({})
                    && call.result_filter.as_deref() == Some("Vpcs[0].VpcId")
            })
            .returning(|_| Ok(json!("vpc-9")));

        let value = HelperFunction::CallRemote
            .invoke(
                "call_aws",
                &helpers,
                vec![json!("ec2"), json!("describe_vpcs")],
                vec![("result_filter".to_string(), json!("Vpcs[0].VpcId"))],
            )
            .unwrap();
        assert_eq!(value, json!("vpc-9"));
    }

    #[test]
    fn test_binding_errors() {
        let helpers = NoHelpers;

        let err = HelperFunction::StackResource
            .invoke("get_stack_resource", &helpers, vec![json!("a")], vec![])
            .unwrap_err();
        assert!(err.to_string().contains("missing required argument `resource_id`"));

        let err = HelperFunction::StackResource
            .invoke(
                "get_stack_resource",
                &helpers,
                vec![json!("a"), json!("b")],
                vec![("stack".to_string(), json!("c"))],
            )
            .unwrap_err();
        assert!(err.to_string().contains("multiple values"));

        let err = HelperFunction::StackResource
            .invoke(
                "get_stack_resource",
                &helpers,
                vec![],
                vec![("colour".to_string(), json!("red"))],
            )
            .unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument `colour`"));
    }

    #[test]
    fn test_lookup_names() {
        assert_eq!(
            HelperFunction::lookup("call_remote_api"),
            Some(HelperFunction::CallRemote)
        );
        assert_eq!(HelperFunction::lookup("open"), None);
    }
}
