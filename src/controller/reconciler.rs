//! Reconcile loop: turn queued event names into counter advances

use std::sync::Arc;

use thiserror::Error;

use super::cache::NotificationCache;
use super::counter::{CompletionCounter, CompletionDetector};
use super::queue::DispatchQueue;

/// Transient reconcile failure; the key is retried
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
  #[error("event '{0}' not found in cache")]
  NotFound(String),
}

/// Successful reconcile outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
  /// A new image pull was counted; carries the counter value
  Counted(u32),
  /// A pull already counted under this event name
  Duplicate(u32),
  /// Not a pull for our workload
  Skipped,
}

/// Decides whether an event is a qualifying pull and advances the counter
pub struct Reconciler {
  cache: NotificationCache,
  counter: Arc<CompletionCounter>,
  detector: CompletionDetector,
  workload: String,
}

impl Reconciler {
  pub fn new(
    cache: NotificationCache,
    counter: Arc<CompletionCounter>,
    detector: CompletionDetector,
    workload: impl Into<String>,
  ) -> Self {
    Self {
      cache,
      counter,
      detector,
      workload: workload.into(),
    }
  }

  pub fn reconcile(&self, key: &str) -> Result<Reconciled, ReconcileError> {
    let event = self
      .cache
      .get(key)
      .ok_or_else(|| ReconcileError::NotFound(key.to_string()))?;

    if !event.is_image_pulled_for(&self.workload) {
      return Ok(Reconciled::Skipped);
    }

    let advance = self.counter.try_advance(&event.name);
    if !advance.advanced {
      return Ok(Reconciled::Duplicate(advance.value));
    }

    tracing::debug!(
      "Image pulled for '{}' ({}/{})",
      event.involved_object,
      advance.value,
      self.counter.target()
    );
    self.detector.observe(advance);
    Ok(Reconciled::Counted(advance.value))
  }
}

/// Pull keys from the queue until it shuts down
pub async fn run_worker(id: usize, queue: DispatchQueue, reconciler: Arc<Reconciler>, max_retries: Option<u32>) {
  tracing::debug!("Reconcile worker {id} started");
  while process_next(&queue, &reconciler, max_retries).await {}
  tracing::debug!("Reconcile worker {id} stopped");
}

/// Process one key. Returns `false` once the queue has shut down.
pub async fn process_next(queue: &DispatchQueue, reconciler: &Reconciler, max_retries: Option<u32>) -> bool {
  let Some(key) = queue.get().await else {
    return false;
  };

  match reconciler.reconcile(&key) {
    Ok(outcome) => {
      queue.forget(&key);
      tracing::debug!("Synced '{key}': {outcome:?}");
    }
    Err(e) => {
      let requeues = queue.num_requeues(&key);
      if max_retries.is_some_and(|max| requeues >= max) {
        queue.forget(&key);
        tracing::warn!("Dropping '{key}' after {requeues} retries: {e}");
      } else {
        queue.add_rate_limited(key.clone());
        tracing::debug!("Failed to sync '{key}': {e}, requeuing");
      }
    }
  }

  queue.done(&key);
  true
}
