//! Template dialects and file-extension sniffing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Templating language used to render a document before it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `${expression}` substitution and `%` control lines
    Mako,
    /// Jinja-style templates, rendered with minijinja
    Jinja,
    /// Already a structured document
    None,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mako => "mako",
            Dialect::Jinja => "jinja",
            Dialect::None => "none",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format of a template file, as told by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Mako,
    Jinja,
    Yaml,
    Json,
}

impl SourceFormat {
    /// Sniff the format from the end of a file name or URL path.
    ///
    /// Matching is case-sensitive and looks only at the trailing extension.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".mako") {
            Some(SourceFormat::Mako)
        } else if name.ends_with(".jinja") {
            Some(SourceFormat::Jinja)
        } else if name.ends_with(".yaml") || name.ends_with(".yml") {
            Some(SourceFormat::Yaml)
        } else if name.ends_with(".json") {
            Some(SourceFormat::Json)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Mako => "mako",
            SourceFormat::Jinja => "jinja",
            SourceFormat::Yaml => "yaml",
            SourceFormat::Json => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_extensions() {
        assert_eq!(SourceFormat::from_name("vpc.yaml.mako"), Some(SourceFormat::Mako));
        assert_eq!(SourceFormat::from_name("s3://b/k/vpc.jinja"), Some(SourceFormat::Jinja));
        assert_eq!(SourceFormat::from_name("stack.yaml"), Some(SourceFormat::Yaml));
        assert_eq!(SourceFormat::from_name("stack.json"), Some(SourceFormat::Json));
        assert_eq!(SourceFormat::from_name("stack.txt"), None);
        assert_eq!(SourceFormat::from_name("stack.MAKO"), None);
        assert_eq!(SourceFormat::from_name("mako"), None);
    }
}
