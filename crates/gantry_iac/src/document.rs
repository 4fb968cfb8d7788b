//! Stack document building.
//!
//! A stack document is rendered in its dialect, loaded as YAML with the
//! gantry tags resolved, and stamped with the build ID. Nested templates
//! referenced from `TemplateBody` go through the same renderer and get a
//! default export for every resource they declare.

use std::io::Read;
use std::sync::Arc;

use gantry_templates::{Dialect, SourceFormat, TemplateRenderer};
use serde_json::json;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::context::Providers;
use crate::error::{IacError, IacResult};
use crate::fetch::{BodyFetcher, TemplateLocation};
use crate::resolver::{OutputProvider, OutputResolver};

/// A rendered, loaded stack definition.
pub type StackDocument = Mapping;

pub const BUILD_ID_KEY: &str = "BuildId";

/// CloudFormation functions with a `!Name` short form mapping to
/// `Fn::Name`.
const INTRINSIC_FUNCTIONS: &[&str] = &[
    "And",
    "Base64",
    "Cidr",
    "Equals",
    "FindInMap",
    "GetAZs",
    "If",
    "ImportValue",
    "Join",
    "Not",
    "Or",
    "Select",
    "Split",
    "Sub",
    "Transform",
];

/// The raw text of a stack document and where it came from.
#[derive(Debug, Clone)]
pub struct StackSource {
    pub name: String,
    pub text: String,
    pub from_stdin: bool,
}

impl StackSource {
    /// Read `path`, or standard input when `path` is `-`.
    pub fn read(path: &str) -> IacResult<Self> {
        if path == "-" {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            return Ok(Self {
                name: "<stdin>".to_string(),
                text,
                from_stdin: true,
            });
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            IacError::configuration(format!("Cannot read stack file {}: {}", path, e))
        })?;
        Ok(Self::file(path, text))
    }

    pub fn file(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            from_stdin: false,
        }
    }

    pub fn stdin(text: impl Into<String>) -> Self {
        Self {
            name: "<stdin>".to_string(),
            text: text.into(),
            from_stdin: true,
        }
    }

    /// The dialect of this source: its extension for files, `hint` for
    /// standard input.
    pub fn dialect(&self, hint: Option<Dialect>) -> IacResult<Dialect> {
        if self.from_stdin {
            return hint.ok_or_else(|| {
                IacError::configuration(
                    "Set the templating engine to 'mako', 'jinja', or 'yaml' with -t when the stack comes from standard input",
                )
            });
        }

        match SourceFormat::from_name(&self.name) {
            Some(SourceFormat::Mako) => Ok(Dialect::Mako),
            Some(SourceFormat::Jinja) => Ok(Dialect::Jinja),
            Some(SourceFormat::Yaml) => Ok(Dialect::None),
            _ => Err(IacError::configuration(format!(
                "Cannot tell the templating engine of {}. Use a .mako, .jinja or .yaml extension",
                self.name
            ))),
        }
    }
}

/// Renders and loads stack documents and nested templates.
#[derive(Clone)]
pub struct DocumentBuilder {
    renderer: TemplateRenderer,
    resolver: Arc<OutputResolver>,
    fetcher: Arc<dyn BodyFetcher>,
}

impl DocumentBuilder {
    pub fn new(providers: &Providers) -> Self {
        Self {
            renderer: providers.renderer(),
            resolver: Arc::clone(&providers.resolver),
            fetcher: Arc::clone(&providers.fetcher),
        }
    }

    /// Render, load and stamp a top-level stack document.
    pub fn build(
        &self,
        source: &StackSource,
        hint: Option<Dialect>,
        build_id: &str,
    ) -> IacResult<StackDocument> {
        if build_id.is_empty() {
            return Err(IacError::configuration(
                "The build ID is required. Use -b option or set BUILD_ID",
            ));
        }

        let dialect = source.dialect(hint)?;
        let mut params = serde_json::Map::new();
        params.insert("build_id".to_string(), json!(build_id));

        let rendered = self
            .renderer
            .render(&source.name, &source.text, &params, dialect)?;

        let mut document = match self.load(&source.name, &rendered)? {
            Value::Mapping(document) => document,
            _ => {
                return Err(IacError::configuration(format!(
                    "Stack document {} must be a mapping",
                    source.name
                )))
            }
        };

        document.insert(Value::from(BUILD_ID_KEY), Value::from(build_id));
        info!("Built stack document from {}", source.name);
        Ok(document)
    }

    /// Fetch and render the nested template at `location`.
    ///
    /// `parameters` and `build_id` are the template variables. Every
    /// top-level resource gets an exported output unless the template
    /// declares an output with the same name.
    pub fn render_nested(
        &self,
        stack_name: &str,
        location: &str,
        parameters: &serde_json::Map<String, serde_json::Value>,
        build_id: &str,
    ) -> IacResult<Mapping> {
        let path = TemplateLocation::parse(location).path();
        let dialect = match SourceFormat::from_name(&path) {
            Some(SourceFormat::Mako) => Dialect::Mako,
            Some(SourceFormat::Jinja) => Dialect::Jinja,
            Some(SourceFormat::Json) => {
                return Err(IacError::configuration("json templates not yet supported"))
            }
            Some(SourceFormat::Yaml) => {
                return Err(IacError::configuration("yaml templates not yet supported"))
            }
            None => return Err(IacError::configuration("file extension not supported")),
        };

        let text = self.fetcher.fetch(location)?;
        let mut params = parameters.clone();
        params.insert("build_id".to_string(), json!(build_id));

        let rendered = self.renderer.render(location, &text, &params, dialect)?;
        let mut template = match self.load(location, &rendered)? {
            Value::Mapping(template) => template,
            _ => {
                return Err(IacError::configuration(format!(
                    "Template {} must be a mapping",
                    location
                )))
            }
        };

        merge_default_outputs(stack_name, &mut template);
        debug!("Rendered nested template {} for {}", location, stack_name);
        Ok(template)
    }

    /// Parse YAML and resolve gantry tags.
    pub fn load(&self, source_name: &str, text: &str) -> IacResult<Value> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| {
            IacError::configuration(format!("Cannot load {} as YAML: {}", source_name, e))
        })?;
        self.resolve_tags(value)
    }

    fn resolve_tags(&self, value: Value) -> IacResult<Value> {
        match value {
            Value::Sequence(items) => Ok(Value::Sequence(
                items
                    .into_iter()
                    .map(|item| self.resolve_tags(item))
                    .collect::<IacResult<_>>()?,
            )),
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key, self.resolve_tags(value)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Tagged(tagged) => {
                let TaggedValue { tag, value } = *tagged;
                let tag = tag.to_string();
                let value = self.resolve_tags(value)?;
                self.apply_tag(tag.trim_start_matches('!'), value)
            }
            other => Ok(other),
        }
    }

    fn apply_tag(&self, tag: &str, value: Value) -> IacResult<Value> {
        match tag {
            "Cloudformation" => {
                let args = tag_args(tag, &value)?;
                let stack = required_str(tag, args, "stack")?;
                if let Some(output) = optional_str(tag, args, "output")? {
                    let found = self.resolver.resolve_output(
                        stack,
                        output,
                        &OutputProvider::CloudFormation,
                    )?;
                    Ok(Value::String(found))
                } else if let Some(resource_id) = optional_str(tag, args, "resource_id")? {
                    Ok(Value::String(self.resolver.resolve_resource(stack, resource_id)?))
                } else {
                    Err(IacError::configuration(
                        "Either 'output' or 'resource_id' must be provided",
                    ))
                }
            }
            "AWS" => {
                let args = tag_args(tag, &value)?;
                let service = required_str(tag, args, "service")?;
                let action = required_str(tag, args, "action")?;
                let arguments = match args.get("arguments") {
                    Some(arguments) if !arguments.is_null() => serde_json::to_value(arguments)?,
                    _ => json!({}),
                };
                let result_filter = optional_str(tag, args, "result_filter")?;

                let result =
                    self.resolver
                        .call_remote_api(service, action, &arguments, result_filter)?;
                Ok(serde_yaml::to_value(result)?)
            }
            "GCPDM" => {
                let args = tag_args(tag, &value)?;
                let deployment = required_str(tag, args, "deployment")?;
                let output = optional_str(tag, args, "output")?
                    .ok_or_else(|| IacError::configuration("'output' must be provided"))?;
                let project = required_str(tag, args, "project")?;

                let found = self.resolver.resolve_output(
                    deployment,
                    output,
                    &OutputProvider::Deployment {
                        project: project.to_string(),
                    },
                )?;
                Ok(Value::String(found))
            }
            "Ref" | "Condition" => Ok(single_key(tag, value)),
            "GetAtt" => {
                let value = match value.as_str().and_then(|s| s.split_once('.')) {
                    Some((resource, attribute)) => {
                        Value::Sequence(vec![Value::from(resource), Value::from(attribute)])
                    }
                    None => value,
                };
                Ok(single_key("Fn::GetAtt", value))
            }
            name if INTRINSIC_FUNCTIONS.contains(&name) => {
                Ok(single_key(&format!("Fn::{}", name), value))
            }
            other => Err(IacError::configuration(format!(
                "Unsupported YAML tag !{}",
                other
            ))),
        }
    }
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Mapping::new();
    map.insert(Value::from(key), value);
    Value::Mapping(map)
}

fn tag_args<'a>(tag: &str, value: &'a Value) -> IacResult<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| IacError::configuration(format!("!{} takes a mapping", tag)))
}

fn optional_str<'a>(tag: &str, args: &'a Mapping, key: &str) -> IacResult<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(IacError::configuration(format!(
            "!{}: '{}' must be a string",
            tag, key
        ))),
    }
}

fn required_str<'a>(tag: &str, args: &'a Mapping, key: &str) -> IacResult<&'a str> {
    optional_str(tag, args, key)?
        .ok_or_else(|| IacError::configuration(format!("!{}: '{}' must be provided", tag, key)))
}

/// Add `{Value: {Ref: name}, Export: {Name: "<stack>-<name>"}}` for every
/// resource, keeping explicit outputs.
pub fn merge_default_outputs(stack_name: &str, template: &mut Mapping) {
    let mut outputs = Mapping::new();

    if let Some(Value::Mapping(resources)) = template.get("Resources") {
        for name in resources.keys() {
            let Some(name) = name.as_str() else { continue };
            let mut export = Mapping::new();
            export.insert(
                Value::from("Name"),
                Value::from(format!("{}-{}", stack_name, name)),
            );

            let mut output = Mapping::new();
            output.insert(Value::from("Value"), single_key("Ref", Value::from(name)));
            output.insert(Value::from("Export"), Value::Mapping(export));
            outputs.insert(Value::from(name), Value::Mapping(output));
        }
    }

    if let Some(Value::Mapping(explicit)) = template.get("Outputs") {
        for (name, output) in explicit {
            outputs.insert(name.clone(), output.clone());
        }
    }

    template.insert(Value::from("Outputs"), Value::Mapping(outputs));
}
