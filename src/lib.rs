//! # pullbench
//!
//! Measures how long a Kubernetes rollout takes to pull a container image on
//! every replica.
//!
//! A run creates a Deployment of the image, watches the cluster events API and
//! counts the distinct `Pulled` events reported for the Deployment's pods. Once
//! the count reaches the replica count, the run stops, deletes the Deployment
//! and reports the elapsed time.
//!
//! - `config` - CLI flags and the resolved run configuration
//! - `controller` - Filter, work queue, reconciler, counter and reporter
//! - `watchers` - Event sources feeding the controller
//! - `kubernetes` - Event schema adapters and the Deployment backend
//! - `run` - The run state machine

pub mod config;
pub mod controller;
pub mod error;
pub mod kubernetes;
pub mod os_signals;
pub mod run;
pub mod utils;
pub mod watchers;

pub use config::{Cli, Config, RetryConfig};
pub use error::Error;
pub use run::{RunSummary, Runner, WorkloadBackend, WorkloadSpec};
