//! Errors that end a run.
//!
//! Only setup-phase failures surface here. Reconcile failures are retried inside
//! the controller and cleanup failures are logged and dropped, so neither ever
//! reaches the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
  /// No usable kubeconfig could be found or parsed
  #[error("can't load kubeconfig '{}': {source}", path.display())]
  Kubeconfig {
    path: PathBuf,
    #[source]
    source: anyhow::Error,
  },

  /// The Kubernetes client could not be created or reached
  #[error("can't create Kubernetes client: {0}")]
  Client(#[source] anyhow::Error),

  /// API discovery for the events schema failed
  #[error("can't discover the events API: {0}")]
  Discovery(#[source] anyhow::Error),

  /// The measured workload could not be created
  #[error("can't create workload '{name}': {source}")]
  CreateWorkload {
    name: String,
    #[source]
    source: anyhow::Error,
  },

  /// The event cache did not sync in time
  #[error("failed to wait for event cache to sync within {0:?}")]
  SyncTimeout(Duration),

  /// The run was cancelled before the event cache synced
  #[error("cancelled while waiting for event cache to sync")]
  SyncInterrupted,
}

impl Error {
  /// Process exit code for this error
  pub fn exit_code(&self) -> u8 {
    match self {
      Error::SyncInterrupted => 0,
      _ => 1,
    }
  }

  /// Short stable label for logs
  pub fn as_label(&self) -> &'static str {
    match self {
      Error::Kubeconfig { .. } => "kubeconfig",
      Error::Client(_) => "client",
      Error::Discovery(_) => "discovery",
      Error::CreateWorkload { .. } => "create_workload",
      Error::SyncTimeout(_) => "sync_timeout",
      Error::SyncInterrupted => "sync_interrupted",
    }
  }
}
