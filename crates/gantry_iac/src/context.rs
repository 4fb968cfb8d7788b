//! Per-invocation provider context.

use std::sync::Arc;
use std::time::Duration;

use gantry_runner::{CommandRunner, LocalRunner};
use gantry_templates::TemplateRenderer;

use crate::aws::AwsClient;
use crate::document::DocumentBuilder;
use crate::error::IacResult;
use crate::fetch::{BodyFetcher, UrlFetcher};
use crate::gcp::DeploymentManagerClient;
use crate::remote::{AwsApi, CloudFormationApi, DeploymentApi};
use crate::resolver::OutputResolver;
use crate::review::{ReviewConsole, TerminalConsole};

/// Timing of polls and fixed delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Pause between deployment status probes
    pub interval: Duration,
    /// Number of probes before giving up
    pub attempts: u32,
    /// Pause after requesting a change set, before waiting on it
    pub change_set_delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 60,
            change_set_delay: Duration::from_secs(2),
        }
    }
}

impl WaitPolicy {
    /// No pauses; for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            interval: Duration::ZERO,
            attempts,
            change_set_delay: Duration::ZERO,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Remote clients, caches and the operator console for one invocation.
///
/// Built once and handed to everything that needs remote access.
#[derive(Clone)]
pub struct Providers {
    pub cloudformation: Arc<dyn CloudFormationApi>,
    pub deployments: Arc<dyn DeploymentApi>,
    pub aws: Arc<dyn AwsApi>,
    pub runner: Arc<dyn CommandRunner>,
    pub fetcher: Arc<dyn BodyFetcher>,
    pub console: Arc<dyn ReviewConsole>,
    pub resolver: Arc<OutputResolver>,
    pub wait: WaitPolicy,
}

impl Providers {
    /// Context over the given clients, fetching bodies with [`UrlFetcher`]
    /// and reviewing on the terminal.
    pub fn new(
        cloudformation: Arc<dyn CloudFormationApi>,
        deployments: Arc<dyn DeploymentApi>,
        aws: Arc<dyn AwsApi>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let resolver = Arc::new(OutputResolver::new(
            Arc::clone(&cloudformation),
            Arc::clone(&deployments),
            Arc::clone(&aws),
        ));
        Self {
            fetcher: Arc::new(UrlFetcher::new(Arc::clone(&aws))),
            cloudformation,
            deployments,
            aws,
            runner,
            console: Arc::new(TerminalConsole),
            resolver,
            wait: WaitPolicy::default(),
        }
    }

    /// The real adapters: the AWS SDK, the Deployment Manager REST API and
    /// local processes.
    pub fn from_env() -> IacResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(LocalRunner::new());
        let aws = Arc::new(AwsClient::from_env(Arc::clone(&runner))?);
        let deployments = Arc::new(DeploymentManagerClient::from_env(Arc::clone(&runner)));
        Ok(Self::new(aws.clone(), deployments, aws, runner))
    }

    pub fn with_console(mut self, console: Arc<dyn ReviewConsole>) -> Self {
        self.console = console;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn BodyFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Renderer whose helpers resolve through this context.
    pub fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(self.resolver.clone())
    }

    pub fn document_builder(&self) -> DocumentBuilder {
        DocumentBuilder::new(self)
    }
}
