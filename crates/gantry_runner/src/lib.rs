//! # gantry_runner
//!
//! Local process execution for gantry.
//!
//! Shell stacks run their lifecycle commands through this crate, and the
//! AWS adapter drives the `aws` CLI with it. Both go through the
//! [`CommandRunner`] trait so tests can swap in [`MockRunner`].
//!
//! # Example
//!
//! ```rust,no_run
//! use gantry_runner::{CommandConfig, CommandRunner, LocalRunner, RunConfig};
//!
//! let runner = LocalRunner::new();
//! let config = CommandConfig::shell("/bin/sh", "echo $BUILD_ID").env("BUILD_ID", "42");
//!
//! let result = runner.run(&config, &RunConfig::captured()).unwrap();
//! println!("Exit code: {}", result.exit_code);
//! ```

pub mod config;
pub mod error;
pub mod local;
pub mod mock;
pub mod runner;

pub use config::{CommandConfig, Invocation, OutputMode, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use local::LocalRunner;
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult};
