//! Deployment Manager adapter over the v2 REST API.

use std::sync::Arc;

use gantry_runner::{CommandConfig, CommandRunner, RunConfig};
use parking_lot::Mutex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::remote::{DeploymentApi, RemoteError, RemoteResult};

/// Default API root.
pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/deploymentmanager/v2";
/// Environment variable overriding the API root.
pub const ENDPOINT_ENV: &str = "GANTRY_GCP_ENDPOINT";
/// Environment variable holding a bearer token.
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Where bearer tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    /// `gcloud auth print-access-token`, run once.
    Gcloud(Arc<dyn CommandRunner>),
}

/// Deployment Manager client.
pub struct DeploymentManagerClient {
    http: Client,
    endpoint: String,
    tokens: TokenSource,
    token: Mutex<Option<String>>,
}

impl DeploymentManagerClient {
    pub fn new(endpoint: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
            token: Mutex::new(None),
        }
    }

    /// Endpoint and token from the environment, falling back to gcloud.
    pub fn from_env(runner: Arc<dyn CommandRunner>) -> Self {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let tokens = match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.is_empty() => TokenSource::Static(token),
            _ => TokenSource::Gcloud(runner),
        };
        Self::new(endpoint, tokens)
    }

    pub fn deployments_url(&self, project: &str) -> String {
        format!("{}/projects/{}/global/deployments", self.endpoint, project)
    }

    pub fn deployment_url(&self, project: &str, deployment: &str) -> String {
        format!("{}/{}", self.deployments_url(project), deployment)
    }

    fn token(&self) -> RemoteResult<String> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = match &self.tokens {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Gcloud(runner) => {
                debug!("Fetching access token from gcloud");
                let result = runner.run(
                    &CommandConfig::argv(["gcloud", "auth", "print-access-token"]),
                    &RunConfig::captured(),
                )?;
                if !result.success() {
                    return Err(RemoteError::Credentials(format!(
                        "gcloud auth print-access-token failed: {}",
                        result.stderr.trim()
                    )));
                }
                result.stdout.trim().to_string()
            }
        };

        *cached = Some(token.clone());
        Ok(token)
    }

    fn send(&self, what: &str, request: RequestBuilder) -> RemoteResult<Value> {
        let response = request.bearer_auth(self.token()?).send()?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(format!("{} not found", what)));
        }
        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let text = response.text()?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl DeploymentApi for DeploymentManagerClient {
    fn get(&self, project: &str, deployment: &str) -> RemoteResult<Value> {
        let url = self.deployment_url(project, deployment);
        debug!("GET {}", url);
        self.send(&format!("Deployment {}/{}", project, deployment), self.http.get(url))
    }

    fn get_manifest(
        &self,
        project: &str,
        deployment: &str,
        manifest: &str,
    ) -> RemoteResult<Value> {
        let url = format!("{}/manifests/{}", self.deployment_url(project, deployment), manifest);
        debug!("GET {}", url);
        self.send(&format!("Manifest {} of {}", manifest, deployment), self.http.get(url))
    }

    fn insert(&self, project: &str, body: &Value) -> RemoteResult<Value> {
        let url = self.deployments_url(project);
        debug!("POST {}", url);
        self.send(&format!("Project {}", project), self.http.post(url).json(body))
    }

    fn delete(&self, project: &str, deployment: &str) -> RemoteResult<Value> {
        let url = self.deployment_url(project, deployment);
        debug!("DELETE {}", url);
        self.send(&format!("Deployment {}/{}", project, deployment), self.http.delete(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_runner::{MockResponse, MockRunner};

    #[test]
    fn test_urls() {
        let client = DeploymentManagerClient::new(
            "http://localhost:8080/dm/v2/",
            TokenSource::Static("t".to_string()),
        );
        assert_eq!(
            client.deployment_url("proj", "net"),
            "http://localhost:8080/dm/v2/projects/proj/global/deployments/net"
        );
    }

    #[test]
    fn test_gcloud_token_is_fetched_once() {
        let runner = MockRunner::new().add_response(MockResponse::success("ya29.token\n"));
        let client = DeploymentManagerClient::new(
            DEFAULT_ENDPOINT,
            TokenSource::Gcloud(Arc::new(runner.clone())),
        );

        assert_eq!(client.token().unwrap(), "ya29.token");
        assert_eq!(client.token().unwrap(), "ya29.token");
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn test_gcloud_failure_is_a_credentials_error() {
        let runner = MockRunner::new().add_response(MockResponse::failure(1, "not logged in"));
        let client =
            DeploymentManagerClient::new(DEFAULT_ENDPOINT, TokenSource::Gcloud(Arc::new(runner)));

        let err = client.token().unwrap_err();
        assert!(matches!(err, RemoteError::Credentials(_)));
        assert!(err.to_string().contains("not logged in"));
    }
}
