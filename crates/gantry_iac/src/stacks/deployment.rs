//! Deployment Manager deployments.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{key_value_list, take_build_id, take_string, text, StackBackend, StackKind};
use crate::context::{Providers, WaitPolicy};
use crate::error::{IacError, IacResult};
use crate::remote::{DeploymentApi, RemoteError};

/// Keys copied into the deployment configuration.
const CONFIG_KEYS: [&str; 3] = ["imports", "resources", "outputs"];

/// A deployment and the insert body built from the document.
pub struct DeploymentStack {
    project: String,
    name: String,
    /// `description`, `fingerprint`, `labels`, `name` and `target`
    body: Value,
    deployments: Arc<dyn DeploymentApi>,
    wait_policy: WaitPolicy,
}

impl DeploymentStack {
    pub fn new(mut attributes: Map<String, Value>, providers: &Providers) -> IacResult<Self> {
        let build_id = take_build_id(&mut attributes)?;
        let project = take_string(&mut attributes, "project", StackKind::Deployment)?;
        let name = take_string(&mut attributes, "name", StackKind::Deployment)?;
        let labels = key_value_list(attributes.remove("labels"), "key", "value", &build_id)?;

        let mut config = Map::new();
        for key in CONFIG_KEYS {
            if let Some(value) = attributes.remove(key) {
                config.insert(key.to_string(), value);
            }
        }
        let imports = read_imports(config.get("imports"))?;

        let mut body = Map::new();
        body.insert("name".to_string(), Value::String(name.clone()));
        body.insert("labels".to_string(), Value::Array(labels));
        body.insert(
            "target".to_string(),
            json!({
                "config": {"content": serde_yaml::to_string(&Value::Object(config))?},
                "imports": imports,
            }),
        );
        for key in ["description", "fingerprint"] {
            if let Some(value) = attributes.remove(key) {
                body.insert(key.to_string(), value);
            }
        }

        for key in attributes.keys() {
            debug!("Ignoring attribute {} of deployment {}", key, name);
        }

        Ok(Self {
            project,
            name,
            body: Value::Object(body),
            deployments: Arc::clone(&providers.deployments),
            wait_policy: providers.wait,
        })
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The live deployment, `None` when there is none.
    pub fn get(&self) -> IacResult<Option<Value>> {
        match self.deployments.get(&self.project, &self.name) {
            Ok(deployment) => Ok(Some(deployment)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert(&self, wait: bool) -> IacResult<()> {
        info!("Inserting deployment {} in project {}", self.name, self.project);
        self.deployments.insert(&self.project, &self.body)?;
        if wait {
            self.wait_until(|deployment| {
                deployment.map(operation_status) == Some("DONE")
            })?;
        }
        Ok(())
    }

    /// Poll until `done` holds for the live deployment.
    ///
    /// Every poll waits one interval first, so the operation just requested
    /// has replaced the previous one when the deployment is read.
    fn wait_until<F>(&self, done: F) -> IacResult<()>
    where
        F: Fn(Option<&Value>) -> bool,
    {
        for attempt in 1..=self.wait_policy.attempts {
            std::thread::sleep(self.wait_policy.interval);
            let deployment = self.get()?;
            if let Some(deployment) = &deployment {
                check_operation(deployment)?;
            }
            if done(deployment.as_ref()) {
                return Ok(());
            }
            debug!(
                "Deployment {} not ready after {} polls",
                self.name, attempt
            );
        }

        Err(RemoteError::WaitTimeout {
            what: format!("deployment {}", self.name),
            seconds: self.wait_policy.timeout().as_secs(),
        }
        .into())
    }
}

fn operation_status(deployment: &Value) -> &str {
    deployment
        .pointer("/operation/status")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// A finished operation that carries errors fails the wait.
fn check_operation(deployment: &Value) -> IacResult<()> {
    let errors = deployment
        .pointer("/operation/error/errors")
        .and_then(Value::as_array);

    match errors.and_then(|errors| errors.first()) {
        Some(first) if operation_status(deployment) == "DONE" => Err(RemoteError::api(
            "deploymentmanager",
            deployment
                .pointer("/operation/operationType")
                .map(text)
                .unwrap_or_else(|| "operation".to_string()),
            first.get("code").map(text).unwrap_or_default(),
            first.get("message").map(text).unwrap_or_default(),
        )
        .into()),
        _ => Ok(()),
    }
}

/// `[{path, name?}]` into `[{content, name}]`, reading each path.
fn read_imports(declared: Option<&Value>) -> IacResult<Vec<Value>> {
    let declared = match declared {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(declared)) => declared,
        Some(_) => return Err(IacError::configuration("imports must be a list")),
    };

    declared
        .iter()
        .map(|import| {
            let path = import
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| IacError::configuration("Every import needs a 'path'"))?;
            let content = std::fs::read_to_string(path).map_err(|e| {
                IacError::configuration(format!("Cannot read import {}: {}", path, e))
            })?;
            let name = import
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(path);
            Ok(json!({"content": content, "name": name}))
        })
        .collect()
}

impl StackBackend for DeploymentStack {
    fn create(&self, wait: bool) -> IacResult<()> {
        self.insert(wait)
    }

    fn delete(&self, wait: bool) -> IacResult<()> {
        if self.get()?.is_none() {
            return Err(IacError::configuration(format!(
                "Deployment doesn't exist: {}",
                self.name
            )));
        }

        info!("Deleting deployment {} in project {}", self.name, self.project);
        self.deployments.delete(&self.project, &self.name)?;
        if wait {
            self.wait_until(|deployment| deployment.is_none())?;
        }
        Ok(())
    }

    fn update(&self, wait: bool, _review: bool) -> IacResult<()> {
        self.insert(wait)
    }

    fn upsert(&self, wait: bool, review: bool) -> IacResult<()> {
        match self.get()? {
            Some(_) => self.update(wait, review),
            None => self.create(wait),
        }
    }

    fn render(&self) -> IacResult<String> {
        let rendered = json!({"project": self.project, "body": self.body});
        Ok(serde_yaml::to_string(&rendered)?)
    }

    fn validate(&self) -> IacResult<()> {
        info!("Nothing to validate for deployment {}", self.name);
        Ok(())
    }

    fn list(&self) -> IacResult<String> {
        match self.get()? {
            Some(deployment) => Ok(serde_yaml::to_string(&deployment)?),
            None => Ok(format!(
                "Deployment {} is not deployed in project {}\n",
                self.name, self.project
            )),
        }
    }
}
