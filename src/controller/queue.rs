//! Deduplicating work queue for event names
//!
//! Semantics follow the usual controller work queue:
//! - a key is queued at most once (`dirty` tracks queued-but-not-started keys)
//! - a key being processed is never handed to a second worker; re-adding it marks
//!   it dirty and it is queued again when the current attempt calls [`DispatchQueue::done`]
//! - failed keys come back through [`DispatchQueue::add_rate_limited`] with a per-key
//!   exponential delay until [`DispatchQueue::forget`] clears their history
//! - after [`DispatchQueue::shutdown`], new adds are ignored, pending delayed adds are
//!   dropped and [`DispatchQueue::get`] returns `None` once the queue is drained

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shortest retry delay. A zero delay would hand a failing key straight back to
/// the worker without ever yielding to the runtime.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ItemBackoff {
  base: Duration,
  max: Duration,
  failures: HashMap<String, u32>,
}

impl ItemBackoff {
  /// Both bounds are raised to at least [`MIN_RETRY_DELAY`], and `max` to at least `base`
  pub fn new(base: Duration, max: Duration) -> Self {
    let base = base.max(MIN_RETRY_DELAY);
    Self {
      base,
      max: max.max(base),
      failures: HashMap::new(),
    }
  }

  /// Delay for the next retry of `key`, counting this retry as a failure
  pub fn next_delay(&mut self, key: &str) -> Duration {
    let attempt = self.failures.entry(key.to_string()).or_insert(0);
    let delay = Self::delay_for(self.base, self.max, *attempt);
    *attempt = attempt.saturating_add(1);
    delay
  }

  fn delay_for(base: Duration, max: Duration, attempt: u32) -> Duration {
    2u32
      .checked_pow(attempt)
      .and_then(|factor| base.checked_mul(factor))
      .map_or(max, |delay| delay.min(max))
  }

  pub fn requeues(&self, key: &str) -> u32 {
    self.failures.get(key).copied().unwrap_or(0)
  }

  pub fn forget(&mut self, key: &str) {
    self.failures.remove(key);
  }
}

#[derive(Default)]
struct QueueState {
  queue: VecDeque<String>,
  dirty: HashSet<String>,
  processing: HashSet<String>,
  shutting_down: bool,
}

struct Shared {
  state: Mutex<QueueState>,
  backoff: Mutex<ItemBackoff>,
  notify: Notify,
  shutdown: CancellationToken,
}

/// Cloneable handle to a shared dispatch queue
#[derive(Clone)]
pub struct DispatchQueue {
  shared: Arc<Shared>,
}

impl DispatchQueue {
  pub fn new(backoff: ItemBackoff) -> Self {
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(QueueState::default()),
        backoff: Mutex::new(backoff),
        notify: Notify::new(),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  /// Queue a key unless it is already queued
  pub fn add(&self, key: impl Into<String>) {
    let key = key.into();
    {
      let mut state = self.shared.state.lock();
      if state.shutting_down || !state.dirty.insert(key.clone()) {
        return;
      }
      if state.processing.contains(&key) {
        // Requeued by `done`
        return;
      }
      state.queue.push_back(key);
    }
    self.shared.notify.notify_one();
  }

  /// Queue a key after `delay`, unless the queue shuts down first
  pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
    let key = key.into();
    if self.is_shutting_down() {
      return;
    }
    if delay.is_zero() {
      self.add(key);
      return;
    }

    let queue = self.clone();
    let shutdown = self.shared.shutdown.clone();
    tokio::spawn(async move {
      tokio::select! {
        () = shutdown.cancelled() => {}
        () = tokio::time::sleep(delay) => queue.add(key),
      }
    });
  }

  /// Queue a key after its per-key backoff delay
  pub fn add_rate_limited(&self, key: impl Into<String>) {
    let key = key.into();
    let delay = self.shared.backoff.lock().next_delay(&key);
    tracing::trace!("Requeueing '{key}' in {delay:?}");
    self.add_after(key, delay);
  }

  /// Clear the retry history of a key
  pub fn forget(&self, key: &str) {
    self.shared.backoff.lock().forget(key);
  }

  /// Number of rate-limited requeues recorded for a key since it was last forgotten
  pub fn num_requeues(&self, key: &str) -> u32 {
    self.shared.backoff.lock().requeues(key)
  }

  /// Wait for the next key. Returns `None` once the queue is shut down and drained.
  pub async fn get(&self) -> Option<String> {
    loop {
      let notified = self.shared.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      {
        let mut state = self.shared.state.lock();
        if let Some(key) = state.queue.pop_front() {
          state.dirty.remove(&key);
          state.processing.insert(key.clone());
          return Some(key);
        }
        if state.shutting_down {
          return None;
        }
      }

      notified.await;
    }
  }

  /// Mark a key as no longer being processed
  pub fn done(&self, key: &str) {
    let requeued = {
      let mut state = self.shared.state.lock();
      state.processing.remove(key);
      if state.dirty.contains(key) {
        state.queue.push_back(key.to_string());
        true
      } else {
        false
      }
    };
    if requeued {
      self.shared.notify.notify_one();
    }
  }

  /// Stop accepting work and wake every blocked `get`
  pub fn shutdown(&self) {
    self.shared.state.lock().shutting_down = true;
    self.shared.shutdown.cancel();
    self.shared.notify.notify_waiters();
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shared.state.lock().shutting_down
  }

  /// Number of queued keys, excluding keys being processed
  pub fn len(&self) -> usize {
    self.shared.state.lock().queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
