//! pullbench - measure image pull time across a rollout.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pullbench::controller::{CancelReason, Progress};
use pullbench::kubernetes::{DeploymentBackend, KubeClient};
use pullbench::os_signals::wait_for_shutdown_signal;
use pullbench::utils::workload_name;
use pullbench::watchers::KubeEventSource;
use pullbench::{Cli, Config, Error, RunSummary, Runner};

fn main() -> ExitCode {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = cli.config();

  let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
    Ok(runtime) => runtime,
    Err(e) => {
      tracing::error!("Can't start async runtime: {e}");
      return ExitCode::FAILURE;
    }
  };

  match runtime.block_on(run(config)) {
    Ok(summary) => {
      print_summary(&summary);
      if !summary.completed() {
        let reason = summary.reason.map_or_else(|| "unknown".to_string(), |r| r.to_string());
        tracing::warn!("Run stopped before every replica pulled ({reason})");
      }
      ExitCode::SUCCESS
    }
    Err(e) => {
      tracing::error!(kind = e.as_label(), "{e}");
      ExitCode::from(e.exit_code())
    }
  }
}

async fn run(config: Config) -> Result<RunSummary, Error> {
  let Some(kubeconfig) = config.kubeconfig.clone() else {
    return Err(Error::Kubeconfig {
      path: PathBuf::new(),
      source: anyhow::anyhow!("no home directory found, pass --kubeconfig"),
    });
  };
  let kube_config = KubeClient::load_config(&kubeconfig).await.map_err(|source| Error::Kubeconfig {
    path: kubeconfig.clone(),
    source,
  })?;
  let client = KubeClient::from_config(kube_config).map_err(Error::Client)?;
  let schema = client.event_schema().await.map_err(Error::Discovery)?;

  let workload = workload_name(&config.workload_prefix, &Local::now());
  print_banner(&config, &workload);

  let backend = DeploymentBackend::new(client.clone(), config.namespace.clone());
  let source = KubeEventSource::new(client.client(), schema);
  let runner = Runner::new(config, workload, backend, source);

  let signal = runner.signal();
  let signals = tokio::spawn(async move {
    match wait_for_shutdown_signal().await {
      Ok(()) => {
        tracing::info!("Termination signal received, stopping");
        signal.fire(CancelReason::ExternalSignal);
      }
      Err(e) => tracing::warn!("Can't listen for termination signals: {e}"),
    }
  });

  let result = runner.run(print_progress).await;
  signals.abort();
  result
}

#[allow(clippy::print_stdout)]
fn print_banner(config: &Config, workload: &str) {
  println!(
    "Start measuring image pull. Replicas={}. Image={}. Workload={workload}",
    config.replicas, config.image
  );
}

#[allow(clippy::print_stdout, clippy::needless_pass_by_value)]
fn print_progress(progress: Progress) {
  println!("{progress}");
}

#[allow(clippy::print_stdout)]
fn print_summary(summary: &RunSummary) {
  println!("{summary}");
}
