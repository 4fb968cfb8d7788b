//! Template rendering across dialects.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::error::TemplateResult;
use crate::helpers::{NoHelpers, TemplateHelpers};
use crate::{jinja, mako};

/// Renders stack templates with the lookup helpers in scope.
///
/// Every dialect sees the same helper functions, bound to one
/// [`TemplateHelpers`] implementation for the whole run.
#[derive(Clone)]
pub struct TemplateRenderer {
    helpers: Arc<dyn TemplateHelpers>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(Arc::new(NoHelpers))
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    /// Create a renderer bound to `helpers`.
    pub fn new(helpers: Arc<dyn TemplateHelpers>) -> Self {
        Self { helpers }
    }

    pub fn helpers(&self) -> Arc<dyn TemplateHelpers> {
        Arc::clone(&self.helpers)
    }

    /// Render `text` in `dialect`.
    ///
    /// `source_name` only labels diagnostics. `Dialect::None` returns the
    /// text unchanged.
    pub fn render(
        &self,
        source_name: &str,
        text: &str,
        params: &Map<String, Value>,
        dialect: Dialect,
    ) -> TemplateResult<String> {
        if dialect == Dialect::None {
            debug!("{} needs no templating", source_name);
            return Ok(text.to_string());
        }

        info!("Rendering {} as {}", source_name, dialect);
        match dialect {
            Dialect::Mako => mako::render(source_name, text, params, self.helpers.as_ref()),
            Dialect::Jinja => jinja::render(source_name, text, params, self.helpers()),
            Dialect::None => Ok(text.to_string()),
        }
    }
}
