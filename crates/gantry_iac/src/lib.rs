//! # gantry_iac
//!
//! Stack lifecycle orchestration for gantry.
//!
//! A stack document is rendered and loaded by [`DocumentBuilder`], turned
//! into one of the [`Stack`] backends, and driven through the
//! [`StackBackend`] verbs. Remote access goes through the traits in
//! [`remote`]; [`Providers`] carries one set of clients and lookup caches
//! for an invocation.
//!
//! ## Backends
//!
//! - CloudFormation, through the AWS SDK, with change-set review
//! - Deployment Manager, through its REST API, with bounded polling
//! - Local shell commands
//!
//! ## Example
//!
//! ```rust,no_run
//! use gantry_iac::{Providers, Stack, StackBackend, StackSource};
//!
//! let providers = Providers::from_env().unwrap();
//! let source = StackSource::read("stacks/network.yaml.mako").unwrap();
//! let document = providers.document_builder().build(&source, None, "42").unwrap();
//!
//! let stack = Stack::from_document(document, &providers).unwrap();
//! stack.upsert(true, stack.default_review()).unwrap();
//! ```

pub mod aws;
pub mod aws_cli;
pub mod context;
pub mod document;
pub mod error;
pub mod fetch;
pub mod gcp;
pub mod mock;
pub mod remote;
pub mod resolver;
pub mod review;
pub mod stacks;

pub use aws::AwsClient;
pub use aws_cli::AwsCli;
pub use context::{Providers, WaitPolicy};
pub use document::{merge_default_outputs, DocumentBuilder, StackDocument, StackSource};
pub use error::{IacError, IacResult};
pub use fetch::{BodyFetcher, TemplateLocation, UrlFetcher};
pub use gcp::{DeploymentManagerClient, TokenSource};
pub use remote::{AwsApi, CloudFormationApi, DeploymentApi, RemoteError, RemoteResult, WaitCondition};
pub use resolver::{OutputProvider, OutputResolver};
pub use review::{ask_decision, ChangeSetDecision, ReviewConsole, TerminalConsole};
pub use stacks::{CloudFormationStack, DeploymentStack, ShellStack, Stack, StackBackend, StackKind};
