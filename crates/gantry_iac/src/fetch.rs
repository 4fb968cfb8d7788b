//! Fetching template bodies by location.

use std::sync::Arc;

use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::IacResult;
use crate::remote::{AwsApi, RemoteError};

/// Reads the text at a template location.
#[cfg_attr(test, mockall::automock)]
pub trait BodyFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> IacResult<String>;
}

/// Where a template body lives.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateLocation {
    Http(String),
    /// `s3://bucket/key?VersionId=...`; query pairs become `GetObject`
    /// parameters.
    S3 {
        bucket: String,
        key: String,
        extra: Map<String, Value>,
    },
    File(String),
}

impl TemplateLocation {
    pub fn parse(location: &str) -> Self {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => return TemplateLocation::File(location.to_string()),
        };

        match url.scheme() {
            "http" | "https" => TemplateLocation::Http(location.to_string()),
            "s3" => {
                let mut extra = Map::new();
                for (k, v) in url.query_pairs() {
                    extra
                        .entry(k.into_owned())
                        .or_insert_with(|| Value::String(v.into_owned()));
                }
                TemplateLocation::S3 {
                    bucket: url.host_str().unwrap_or_default().to_string(),
                    key: url.path().trim_start_matches('/').to_string(),
                    extra,
                }
            }
            "file" => TemplateLocation::File(url.path().to_string()),
            // single letter schemes are drive letters
            scheme if scheme.len() == 1 => TemplateLocation::File(location.to_string()),
            _ => TemplateLocation::File(url.path().to_string()),
        }
    }

    /// The path part, used to sniff the template format.
    pub fn path(&self) -> String {
        match self {
            TemplateLocation::Http(url) => Url::parse(url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| url.clone()),
            TemplateLocation::S3 { key, .. } => key.clone(),
            TemplateLocation::File(path) => path.clone(),
        }
    }
}

/// Fetches over HTTP(S), from S3 through the AWS adapter, or from disk.
pub struct UrlFetcher {
    aws: Arc<dyn AwsApi>,
    http: Client,
}

impl UrlFetcher {
    pub fn new(aws: Arc<dyn AwsApi>) -> Self {
        Self {
            aws,
            http: Client::new(),
        }
    }
}

impl BodyFetcher for UrlFetcher {
    fn fetch(&self, location: &str) -> IacResult<String> {
        match TemplateLocation::parse(location) {
            TemplateLocation::Http(url) => {
                debug!("Fetching template over HTTP: {}", url);
                let response = self.http.get(&url).send().map_err(RemoteError::from)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(RemoteError::Http {
                        status: status.as_u16(),
                        body: response.text().unwrap_or_default(),
                    }
                    .into());
                }
                Ok(response.text().map_err(RemoteError::from)?)
            }
            TemplateLocation::S3 { bucket, key, extra } => {
                debug!("Fetching template from s3://{}/{}", bucket, key);
                Ok(self.aws.get_object(&bucket, &key, &extra)?)
            }
            TemplateLocation::File(path) => {
                debug!("Reading template file {}", path);
                Ok(std::fs::read_to_string(&path)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            TemplateLocation::parse("templates/vpc.yaml.mako"),
            TemplateLocation::File("templates/vpc.yaml.mako".to_string())
        );
        assert_eq!(
            TemplateLocation::parse("https://example.com/t/vpc.jinja?x=1").path(),
            "/t/vpc.jinja"
        );

        match TemplateLocation::parse("s3://bucket/path/vpc.mako?VersionId=abc") {
            TemplateLocation::S3 { bucket, key, extra } => {
                assert_eq!(bucket, "bucket");
                assert_eq!(key, "path/vpc.mako");
                assert_eq!(Value::Object(extra), json!({"VersionId": "abc"}));
            }
            other => panic!("unexpected location {:?}", other),
        }
    }

    #[test]
    fn test_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.mako");
        std::fs::write(&path, "Resources: {}\n").unwrap();

        let fetcher = UrlFetcher::new(Arc::new(crate::mock::MockAws::new()));
        let body = fetcher.fetch(path.to_str().unwrap()).unwrap();
        assert_eq!(body, "Resources: {}\n");
    }
}
