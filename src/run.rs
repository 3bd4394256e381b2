//! Run orchestration
//!
//! `Initializing -> WaitingForSync -> Running -> Completing -> TornDown`
//!
//! The event source starts first and must deliver its initial listing before
//! the workload is created. The run then waits on the cancellation signal,
//! fired either by the completion detector or by a termination signal, stops
//! the queue and the source, and deletes the workload on a best-effort basis.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::Config;
use crate::controller::{
  CancelReason, CancellationSignal, CompletionCounter, CompletionDetector, DispatchQueue, EventFilter, ItemBackoff,
  NotificationCache, Progress, Reconciler, Reporter, run_worker,
};
use crate::error::Error;
use crate::watchers::{EventSink, EventSource};

/// Workload to create for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
  pub name: String,
  pub image: String,
  pub replicas: u32,
}

/// Backend that owns the measured workload
pub trait WorkloadBackend: Send + Sync + 'static {
  /// Create the workload and return its identifier
  fn create_workload(&self, spec: &WorkloadSpec) -> impl Future<Output = anyhow::Result<String>> + Send;

  fn delete_workload(&self, id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
  Initializing,
  WaitingForSync,
  Running,
  Completing,
  TornDown,
}

/// Mutable bookkeeping of one run
#[derive(Debug)]
struct RunState {
  phase: RunPhase,
  desired: u32,
  started_at: Option<Instant>,
}

impl RunState {
  fn new(desired: u32) -> Self {
    Self {
      phase: RunPhase::Initializing,
      desired,
      started_at: None,
    }
  }

  fn enter(&mut self, phase: RunPhase) {
    tracing::debug!("Run phase {:?} -> {phase:?}", self.phase);
    self.phase = phase;
  }

  fn elapsed(&self) -> Duration {
    self.started_at.map(|t| t.elapsed()).unwrap_or_default()
  }
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
  pub workload: String,
  pub elapsed: Duration,
  pub desired: u32,
  pub observed: u32,
  pub reason: Option<CancelReason>,
}

impl RunSummary {
  pub fn completed(&self) -> bool {
    self.observed >= self.desired
  }
}

impl std::fmt::Display for RunSummary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Spent {:.3?}. Desired={}. Got={}",
      self.elapsed, self.desired, self.observed
    )
  }
}

/// Drives one measurement run
pub struct Runner<B, S> {
  config: Config,
  workload: String,
  backend: B,
  source: S,
  signal: CancellationSignal,
}

impl<B, S> Runner<B, S>
where
  B: WorkloadBackend,
  S: EventSource,
{
  pub fn new(config: Config, workload: impl Into<String>, backend: B, source: S) -> Self {
    Self {
      config,
      workload: workload.into(),
      backend,
      source,
      signal: CancellationSignal::new(),
    }
  }

  /// Handle for cancelling the run from outside, e.g. on a termination signal
  pub fn signal(&self) -> CancellationSignal {
    self.signal.clone()
  }

  /// Run to completion. `on_progress` receives the periodic progress reports.
  pub async fn run<F>(self, on_progress: F) -> Result<RunSummary, Error>
  where
    F: FnMut(Progress) + Send + 'static,
  {
    let Runner {
      config,
      workload,
      backend,
      source,
      signal,
    } = self;
    let mut state = RunState::new(config.replicas);
    let grace = config.shutdown_grace;

    let cache = NotificationCache::new();
    let queue = DispatchQueue::new(ItemBackoff::new(config.retry.base, config.retry.max));
    let counter = Arc::new(CompletionCounter::new(state.desired));
    let detector = CompletionDetector::new(state.desired, signal.clone());
    let reconciler = Arc::new(Reconciler::new(cache.clone(), counter.clone(), detector, workload.clone()));
    let sink = EventSink::new(EventFilter::new(config.namespace.clone()), cache.clone(), queue.clone());

    let source_task = tokio::spawn(source.run(sink, signal.clone()));

    state.enter(RunPhase::WaitingForSync);
    let synced = tokio::select! {
      () = cache.wait_synced() => Ok(()),
      () = signal.cancelled() => Err(Error::SyncInterrupted),
      () = tokio::time::sleep(config.sync_timeout) => Err(Error::SyncTimeout(config.sync_timeout)),
    };
    if let Err(e) = synced {
      abort(&signal, &queue, source_task, grace).await;
      state.enter(RunPhase::TornDown);
      return Err(e);
    }

    state.enter(RunPhase::Running);
    let spec = WorkloadSpec {
      name: workload.clone(),
      image: config.image.clone(),
      replicas: state.desired,
    };
    let started_at = Instant::now();
    state.started_at = Some(started_at);
    let id = match backend.create_workload(&spec).await {
      Ok(id) => id,
      Err(source) => {
        abort(&signal, &queue, source_task, grace).await;
        state.enter(RunPhase::TornDown);
        return Err(Error::CreateWorkload { name: workload, source });
      }
    };
    tracing::info!("Created workload '{id}' with {} replicas of {}", spec.replicas, spec.image);

    let mut workers = JoinSet::new();
    for worker_id in 0..config.workers.max(1) {
      workers.spawn(run_worker(
        worker_id,
        queue.clone(),
        reconciler.clone(),
        config.retry.max_retries,
      ));
    }
    let reporter = Reporter::new(counter.clone(), config.report_interval, started_at);
    let reporter_task = tokio::spawn(reporter.run(signal.clone(), on_progress));

    signal.cancelled().await;

    state.enter(RunPhase::Completing);
    let elapsed = state.elapsed();
    queue.shutdown();
    join_workers(&mut workers, grace).await;
    join_task("event source", source_task, grace).await;
    join_task("reporter", reporter_task, grace).await;

    state.enter(RunPhase::TornDown);
    // Cleanup never fails the run
    match backend.delete_workload(&id).await {
      Ok(()) => tracing::info!("Deleted workload '{id}'"),
      Err(e) => tracing::warn!("Failed to delete workload '{id}': {e:#}"),
    }

    let summary = RunSummary {
      workload: id,
      elapsed,
      desired: state.desired,
      observed: counter.get(),
      reason: signal.reason(),
    };
    tracing::info!(
      "Run finished ({}): desired={} observed={}",
      summary.reason.map_or_else(|| "unknown".to_string(), |r| r.to_string()),
      summary.desired,
      summary.observed
    );
    Ok(summary)
  }
}

/// Stop everything started before the workload existed
async fn abort(signal: &CancellationSignal, queue: &DispatchQueue, source_task: JoinHandle<()>, grace: Duration) {
  signal.fire(CancelReason::Aborted);
  queue.shutdown();
  join_task("event source", source_task, grace).await;
}

async fn join_workers(workers: &mut JoinSet<()>, grace: Duration) {
  let drained = tokio::time::timeout(grace, async {
    while let Some(result) = workers.join_next().await {
      if let Err(e) = result {
        tracing::warn!("Reconcile worker failed: {e}");
      }
    }
  })
  .await;

  if drained.is_err() {
    tracing::warn!("Reconcile workers still busy after {grace:?}, aborting");
    workers.abort_all();
  }
}

async fn join_task(name: &str, mut task: JoinHandle<()>, grace: Duration) {
  match tokio::time::timeout(grace, &mut task).await {
    Ok(Ok(())) => {}
    Ok(Err(e)) => tracing::warn!("Task '{name}' failed: {e}"),
    Err(_) => {
      tracing::warn!("Task '{name}' still running after {grace:?}, aborting");
      task.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kubernetes::NotificationEvent;
  use chrono::Utc;
  use parking_lot::Mutex;
  use tokio::sync::mpsc;

  const WORKLOAD: &str = "pullbench-0101-000000";

  #[derive(Clone, Default)]
  struct FakeBackend {
    created: Arc<Mutex<Vec<WorkloadSpec>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    fail_create: bool,
    fail_delete: bool,
  }

  impl WorkloadBackend for FakeBackend {
    async fn create_workload(&self, spec: &WorkloadSpec) -> anyhow::Result<String> {
      if self.fail_create {
        anyhow::bail!("deployments.apps is forbidden");
      }
      self.created.lock().push(spec.clone());
      Ok(spec.name.clone())
    }

    async fn delete_workload(&self, id: &str) -> anyhow::Result<()> {
      self.deleted.lock().push(id.to_string());
      if self.fail_delete {
        anyhow::bail!("connection reset");
      }
      Ok(())
    }
  }

  enum Delivery {
    Apply(NotificationEvent),
    Synced,
  }

  struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Delivery>,
  }

  impl EventSource for ChannelSource {
    async fn run(mut self, sink: EventSink, signal: CancellationSignal) {
      loop {
        tokio::select! {
          () = signal.cancelled() => break,
          delivery = self.rx.recv() => match delivery {
            Some(Delivery::Apply(event)) => {
              sink.apply(&event);
            }
            Some(Delivery::Synced) => sink.mark_synced(),
            None => signal.cancelled().await,
          }
        }
      }
    }
  }

  fn config(replicas: u32) -> Config {
    Config {
      image: "busybox:latest".to_string(),
      replicas,
      report_interval: Duration::from_secs(30),
      sync_timeout: Duration::from_secs(10),
      ..Config::default()
    }
  }

  fn event(name: &str, namespace: &str, reason: &str) -> NotificationEvent {
    NotificationEvent {
      name: name.to_string(),
      namespace: namespace.to_string(),
      reason: reason.to_string(),
      involved_object: format!("{WORKLOAD}-7c9d-{name}"),
      received_at: Utc::now(),
    }
  }

  fn pulled(name: &str) -> Delivery {
    Delivery::Apply(event(name, "default", "Pulled"))
  }

  fn runner(
    replicas: u32,
    backend: FakeBackend,
  ) -> (Runner<FakeBackend, ChannelSource>, mpsc::UnboundedSender<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Runner::new(config(replicas), WORKLOAD, backend, ChannelSource { rx }), tx)
  }

  #[tokio::test(start_paused = true)]
  async fn test_completes_after_distinct_pulls() {
    let backend = FakeBackend::default();
    let (runner, tx) = runner(3, backend.clone());
    let signal = runner.signal();
    let handle = tokio::spawn(runner.run(|_| {}));

    tx.send(Delivery::Synced).unwrap();
    tx.send(pulled("a")).unwrap();
    tx.send(pulled("b")).unwrap();
    tx.send(Delivery::Apply(event("d", "default", "Failed"))).unwrap();
    tx.send(Delivery::Apply(event("x", "other", "Pulled"))).unwrap();
    tx.send(pulled("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!signal.is_fired());

    tx.send(pulled("c")).unwrap();
    let summary = handle.await.unwrap().unwrap();

    assert_eq!(summary.observed, 3);
    assert_eq!(summary.desired, 3);
    assert!(summary.completed());
    assert_eq!(summary.reason, Some(CancelReason::TargetReached));
    assert_eq!(summary.workload, WORKLOAD);

    let created = backend.created.lock();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].replicas, 3);
    assert_eq!(created[0].image, "busybox:latest");
    assert_eq!(*backend.deleted.lock(), vec![WORKLOAD.to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_sync_timeout_creates_nothing() {
    let backend = FakeBackend::default();
    let (runner, _tx) = runner(3, backend.clone());
    let signal = runner.signal();

    let result = runner.run(|_| {}).await;
    assert!(matches!(result, Err(Error::SyncTimeout(d)) if d == Duration::from_secs(10)));
    assert!(backend.created.lock().is_empty());
    assert!(backend.deleted.lock().is_empty());
    assert_eq!(signal.reason(), Some(CancelReason::Aborted));
  }

  #[tokio::test(start_paused = true)]
  async fn test_signal_before_sync_interrupts() {
    let backend = FakeBackend::default();
    let (runner, _tx) = runner(3, backend.clone());
    let signal = runner.signal();
    let handle = tokio::spawn(runner.run(|_| {}));

    tokio::time::sleep(Duration::from_secs(1)).await;
    signal.fire(CancelReason::ExternalSignal);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::SyncInterrupted)));
    assert!(backend.created.lock().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_failure_is_fatal() {
    let backend = FakeBackend {
      fail_create: true,
      ..FakeBackend::default()
    };
    let (runner, tx) = runner(3, backend.clone());
    tx.send(Delivery::Synced).unwrap();

    let result = runner.run(|_| {}).await;
    let Err(err) = result else {
      panic!("expected create failure");
    };
    assert!(matches!(err, Error::CreateWorkload { ref name, .. } if name == WORKLOAD));
    assert_eq!(err.exit_code(), 1);
    assert!(backend.deleted.lock().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_external_signal_reports_partial_count() {
    let backend = FakeBackend::default();
    let (runner, tx) = runner(5, backend.clone());
    let signal = runner.signal();
    let handle = tokio::spawn(runner.run(|_| {}));

    tx.send(Delivery::Synced).unwrap();
    tx.send(pulled("a")).unwrap();
    tx.send(pulled("b")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    signal.fire(CancelReason::ExternalSignal);

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.observed, 2);
    assert!(!summary.completed());
    assert_eq!(summary.reason, Some(CancelReason::ExternalSignal));
    assert_eq!(backend.deleted.lock().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_failure_is_swallowed() {
    let backend = FakeBackend {
      fail_delete: true,
      ..FakeBackend::default()
    };
    let (runner, tx) = runner(1, backend.clone());
    let handle = tokio::spawn(runner.run(|_| {}));

    tx.send(Delivery::Synced).unwrap();
    tx.send(pulled("a")).unwrap();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.observed, 1);
    assert_eq!(backend.deleted.lock().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_progress_is_reported_while_running() {
    let backend = FakeBackend::default();
    let (tx, rx) = mpsc::unbounded_channel();
    let config = Config {
      report_interval: Duration::from_secs(1),
      workers: 3,
      ..config(2)
    };
    let runner = Runner::new(config, WORKLOAD, backend, ChannelSource { rx });
    let reports = Arc::new(Mutex::new(Vec::new()));
    let handle = {
      let reports = reports.clone();
      tokio::spawn(runner.run(move |p| reports.lock().push(p)))
    };

    tx.send(Delivery::Synced).unwrap();
    tx.send(pulled("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    tx.send(pulled("b")).unwrap();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.observed, 2);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!((reports[0].desired, reports[0].observed), (2, 1));
  }

  #[test]
  fn test_summary_display() {
    let summary = RunSummary {
      workload: WORKLOAD.to_string(),
      elapsed: Duration::from_millis(1500),
      desired: 20,
      observed: 20,
      reason: Some(CancelReason::TargetReached),
    };
    assert_eq!(summary.to_string(), "Spent 1.500s. Desired=20. Got=20");
  }
}
