//! Error types for templates.

use thiserror::Error;

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur during template operations.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// A rendering failure, flattened to what the template author needs.
    #[error("{}", render_message(.source_name, .line, .column, .message))]
    Render {
        source_name: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("{helper}() failed: {message}")]
    Helper { helper: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TemplateError {
    pub fn render(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            source_name: source_name.into(),
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn helper(helper: impl Into<String>, message: impl ToString) -> Self {
        Self::Helper {
            helper: helper.into(),
            message: message.to_string(),
        }
    }
}

fn render_message(
    source_name: &str,
    line: &Option<usize>,
    column: &Option<usize>,
    message: &str,
) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!("{}:{}:{}: {}", source_name, line, column, message),
        (Some(line), None) => format!("{}:{}: {}", source_name, line, message),
        _ => format!("{}: {}", source_name, message),
    }
}
