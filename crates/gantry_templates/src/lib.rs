//! # gantry_templates
//!
//! Template dialects for gantry stack documents.
//!
//! Stack documents and nested templates may be written in one of two
//! templating dialects before they are loaded as YAML:
//!
//! - `mako`: `${expression}` substitution, `%` control lines and `<% %>`
//!   assignment blocks
//! - `jinja`: Jinja-style templates, rendered with minijinja
//!
//! Both dialects can call back into the deployed world through the helper
//! functions (`get_stack_output`, `get_stack_resource`, `call_aws` and their
//! aliases), implemented by whoever supplies a [`TemplateHelpers`].
//!
//! ## Example
//!
//! ```rust
//! use gantry_templates::{Dialect, TemplateRenderer};
//! use serde_json::{json, Map};
//!
//! let renderer = TemplateRenderer::default();
//! let mut params = Map::new();
//! params.insert("build_id".to_string(), json!("42"));
//!
//! let out = renderer
//!     .render("stack.yaml.mako", "BuildId: ${build_id}", &params, Dialect::Mako)
//!     .unwrap();
//! assert_eq!(out, "BuildId: 42");
//! ```

pub mod dialect;
pub mod error;
pub mod helpers;
pub mod jinja;
pub mod mako;
pub mod renderer;

pub use dialect::{Dialect, SourceFormat};
pub use error::{TemplateError, TemplateResult};
pub use helpers::{HelperFunction, NoHelpers, OutputLookup, RemoteCall, TemplateHelpers};
pub use renderer::TemplateRenderer;
