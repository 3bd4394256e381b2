//! Command-line surface and run configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::utils::resolve_kubeconfig;

/// Measure how long a rollout takes to pull an image on every replica.
///
/// Creates a deployment of the image, counts distinct `Pulled` events for its
/// pods, and reports the elapsed time once every replica has pulled.
#[derive(Debug, Parser)]
#[command(name = "pullbench")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example: pullbench -r 20 docker.io/library/busybox:latest")]
pub struct Cli {
  /// Container image to roll out.
  pub image: String,

  /// Number of replicas to create and wait for.
  #[arg(short, long, alias = "replica", default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=i64::from(i32::MAX)))]
  pub replicas: u32,

  /// Path to the kubeconfig file (default: ~/.kube/config).
  #[arg(long, env = "KUBECONFIG")]
  pub kubeconfig: Option<PathBuf>,

  /// Namespace for the deployment and the events to watch.
  #[arg(short, long, default_value = "default")]
  pub namespace: String,

  /// Prefix of the generated deployment name.
  #[arg(long, default_value = "pullbench")]
  pub workload_prefix: String,

  /// Seconds between progress reports.
  #[arg(long, default_value_t = 30, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
  pub report_interval: u64,

  /// Seconds to wait for the initial event listing.
  #[arg(long, default_value_t = 120, value_name = "SECS")]
  pub sync_timeout: u64,

  /// Number of reconcile workers.
  #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
  pub workers: u16,

  /// Give up on an event after this many retries (default: retry until the run ends).
  #[arg(long)]
  pub max_retries: Option<u32>,

  /// Initial per-event retry delay in milliseconds.
  #[arg(long, default_value_t = 5, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
  pub retry_base_ms: u64,

  /// Upper bound of the per-event retry delay in seconds.
  #[arg(long, default_value_t = 60, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
  pub retry_max_secs: u64,

  /// Seconds to wait for workers to stop once the run ends.
  #[arg(long, default_value_t = 5, value_name = "SECS")]
  pub shutdown_grace: u64,
}

impl Cli {
  /// Get the effective configuration.
  pub fn config(&self) -> Config {
    Config {
      image: self.image.clone(),
      replicas: self.replicas,
      kubeconfig: resolve_kubeconfig(self.kubeconfig.as_deref()),
      namespace: self.namespace.clone(),
      workload_prefix: self.workload_prefix.clone(),
      report_interval: Duration::from_secs(self.report_interval),
      sync_timeout: Duration::from_secs(self.sync_timeout),
      workers: usize::from(self.workers),
      retry: RetryConfig {
        base: Duration::from_millis(self.retry_base_ms),
        max: Duration::from_secs(self.retry_max_secs),
        max_retries: self.max_retries,
      },
      shutdown_grace: Duration::from_secs(self.shutdown_grace),
    }
  }
}

/// Per-event retry policy for failed reconciles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
  pub base: Duration,
  pub max: Duration,
  /// `None` retries until the run ends
  pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      base: Duration::from_millis(5),
      max: Duration::from_secs(60),
      max_retries: None,
    }
  }
}

/// Run configuration, written once at startup
#[derive(Debug, Clone)]
pub struct Config {
  pub image: String,
  /// Desired replicas, which is also the completion target
  pub replicas: u32,
  pub kubeconfig: Option<PathBuf>,
  pub namespace: String,
  pub workload_prefix: String,
  pub report_interval: Duration,
  pub sync_timeout: Duration,
  pub workers: usize,
  pub retry: RetryConfig,
  pub shutdown_grace: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      image: String::new(),
      replicas: 20,
      kubeconfig: None,
      namespace: "default".to_string(),
      workload_prefix: "pullbench".to_string(),
      report_interval: Duration::from_secs(30),
      sync_timeout: Duration::from_secs(120),
      workers: 1,
      retry: RetryConfig::default(),
      shutdown_grace: Duration::from_secs(5),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let cli = Cli::try_parse_from(["pullbench", "busybox:latest"]).unwrap();
    let config = cli.config();

    assert_eq!(config.image, "busybox:latest");
    assert_eq!(config.replicas, 20);
    assert_eq!(config.namespace, "default");
    assert_eq!(config.report_interval, Duration::from_secs(30));
    assert_eq!(config.workers, 1);
    assert_eq!(config.retry, RetryConfig::default());
  }

  #[test]
  fn test_flags() {
    let cli = Cli::try_parse_from([
      "pullbench",
      "-r",
      "5",
      "--kubeconfig",
      "/etc/kube/admin.conf",
      "--namespace",
      "bench",
      "--workers",
      "4",
      "--max-retries",
      "10",
      "--retry-max-secs",
      "2",
      "registry.local/app:v2",
    ])
    .unwrap();
    let config = cli.config();

    assert_eq!(config.image, "registry.local/app:v2");
    assert_eq!(config.replicas, 5);
    assert_eq!(config.kubeconfig, Some(PathBuf::from("/etc/kube/admin.conf")));
    assert_eq!(config.namespace, "bench");
    assert_eq!(config.workers, 4);
    assert_eq!(config.retry.max_retries, Some(10));
    assert_eq!(config.retry.max, Duration::from_secs(2));
  }

  #[test]
  fn test_replica_alias() {
    let cli = Cli::try_parse_from(["pullbench", "--replica", "3", "busybox"]).unwrap();
    assert_eq!(cli.replicas, 3);
  }

  #[test]
  fn test_requires_exactly_one_image() {
    assert!(Cli::try_parse_from(["pullbench"]).is_err());
    assert!(Cli::try_parse_from(["pullbench", "busybox", "alpine"]).is_err());
  }

  #[test]
  fn test_rejects_zero_replicas() {
    assert!(Cli::try_parse_from(["pullbench", "-r", "0", "busybox"]).is_err());
    assert!(Cli::try_parse_from(["pullbench", "--workers", "0", "busybox"]).is_err());
  }

  #[test]
  fn test_rejects_zero_retry_delays() {
    assert!(Cli::try_parse_from(["pullbench", "--retry-base-ms", "0", "busybox"]).is_err());
    assert!(Cli::try_parse_from(["pullbench", "--retry-max-secs", "0", "busybox"]).is_err());

    let cli = Cli::try_parse_from(["pullbench", "--retry-base-ms", "1", "--retry-max-secs", "1", "busybox"]).unwrap();
    assert_eq!(cli.config().retry.base, Duration::from_millis(1));
  }
}
