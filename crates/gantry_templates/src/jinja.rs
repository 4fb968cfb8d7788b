//! The `jinja` dialect, rendered with minijinja.

use std::sync::Arc;

use minijinja::value::{Rest, Value as JinjaValue};
use minijinja::{AutoEscape, Environment, Error, ErrorKind};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};
use crate::helpers::{HelperFunction, TemplateHelpers};

/// Render `text` with `params` as the context and the helpers registered as
/// functions taking positional and keyword arguments.
///
/// Undefined names render empty, as in Jinja2.
pub fn render(
    source_name: &str,
    text: &str,
    params: &Map<String, Value>,
    helpers: Arc<dyn TemplateHelpers>,
) -> TemplateResult<String> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);

    for (name, function) in HelperFunction::NAMES {
        let helpers = Arc::clone(&helpers);
        let function = *function;
        let name = *name;
        env.add_function(name, move |args: Rest<JinjaValue>| {
            let (positional, keywords) = split_arguments(args.0)?;
            function
                .invoke(name, helpers.as_ref(), positional, keywords)
                .map(|value| JinjaValue::from_serialize(&value))
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
        });
    }

    debug!("Rendering jinja template {}", source_name);
    env.render_named_str(source_name, text, params)
        .map_err(|e| flatten(source_name, text, &e))
}

/// Positional values, then the trailing keyword map if there is one.
fn split_arguments(
    mut args: Vec<JinjaValue>,
) -> Result<(Vec<Value>, Vec<(String, Value)>), Error> {
    let keywords = match args.last() {
        Some(last) if last.is_kwargs() => match to_json(last)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    if !keywords.is_empty() {
        args.pop();
    }

    let positional = args.iter().map(to_json).collect::<Result<Vec<_>, _>>()?;
    Ok((positional, keywords))
}

fn to_json(value: &JinjaValue) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("argument is not plain data: {}", e),
        )
    })
}

/// Reduce minijinja's error to its detail and position.
fn flatten(source_name: &str, text: &str, err: &Error) -> TemplateError {
    let message = match err.detail() {
        Some(detail) => detail.to_string(),
        None => err.kind().to_string(),
    };
    let column = err.range().map(|range| {
        let before = &text[..range.start.min(text.len())];
        before
            .rfind('\n')
            .map(|nl| before[nl + 1..].chars().count())
            .unwrap_or_else(|| before.chars().count())
            + 1
    });

    TemplateError::Render {
        source_name: source_name.to_string(),
        line: err.line(),
        column: err.line().and(column),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{MockTemplateHelpers, NoHelpers};
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_renders_context_and_control_flow() {
        let out = render(
            "stack.yaml.jinja",
            "{% for z in zones %}- {{ z }}-{{ build_id }}\n{% endfor %}",
            &params(json!({"zones": ["a", "b"], "build_id": "7"})),
            Arc::new(NoHelpers),
        )
        .unwrap();
        assert_eq!(out, "- a-7\n- b-7\n");
    }

    #[test]
    fn test_helpers_take_keyword_arguments() {
        let mut helpers = MockTemplateHelpers::new();
        helpers
            .expect_stack_output()
            .withf(|lookup| lookup.stack == "vpc" && lookup.output == "VpcId")
            .times(1)
            .returning(|_| Ok("vpc-123".to_string()));

        let out = render(
            "t.jinja",
            "VpcId: {{ get_stack_output(stack=\"vpc\", output=\"VpcId\") }}",
            &Map::new(),
            Arc::new(helpers),
        )
        .unwrap();
        assert_eq!(out, "VpcId: vpc-123");
    }

    #[test]
    fn test_helpers_take_positional_arguments() {
        let mut helpers = MockTemplateHelpers::new();
        helpers
            .expect_stack_output()
            .withf(|lookup| {
                lookup.stack == "vpc"
                    && lookup.output == "VpcId"
                    && lookup.provider.as_deref() == Some("gcp")
            })
            .times(1)
            .returning(|_| Ok("vpc-123".to_string()));

        let out = render(
            "t.jinja",
            "VpcId: {{ get_stack_output('vpc', 'VpcId', provider='gcp') }}",
            &Map::new(),
            Arc::new(helpers),
        )
        .unwrap();
        assert_eq!(out, "VpcId: vpc-123");
    }

    #[test]
    fn test_undefined_names_render_empty() {
        let out = render("t.jinja", "a: '{{ missing }}'", &Map::new(), Arc::new(NoHelpers))
            .unwrap();
        assert_eq!(out, "a: ''");
    }

    #[test]
    fn test_parse_error_has_position() {
        let err = render("t.jinja", "a\n{{ oops(", &Map::new(), Arc::new(NoHelpers)).unwrap_err();
        match err {
            TemplateError::Render {
                source_name, line, message, ..
            } => {
                assert_eq!(source_name, "t.jinja");
                assert_eq!(line, Some(2));
                assert!(!message.contains("(in t.jinja"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_helper_error_is_innermost_message() {
        let err = render(
            "t.jinja",
            "{{ get_stack_resource(stack=\"net\") }}",
            &Map::new(),
            Arc::new(NoHelpers),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("t.jinja:1"));
        assert!(message.ends_with(": get_stack_resource() failed: missing required argument `resource_id`"));
    }
}
