//! Event sources
//!
//! An [`EventSource`] delivers cluster events into an [`EventSink`] until the run
//! is cancelled. The sink applies the namespace filter, keeps the notification
//! cache current and enqueues event names for the reconcile workers.
//!
//! - `kubernetes` - Watches the cluster events API with kube-runtime

mod kubernetes;

pub use kubernetes::KubeEventSource;

use std::future::Future;

use crate::controller::{CancellationSignal, DispatchQueue, EventFilter, NotificationCache};
use crate::kubernetes::{EventObject, NotificationEvent};

/// Producer of cluster events
pub trait EventSource: Send + 'static {
  /// Deliver events into `sink` until `signal` fires
  fn run(self, sink: EventSink, signal: CancellationSignal) -> impl Future<Output = ()> + Send;
}

/// Entry point for delivered events
#[derive(Clone)]
pub struct EventSink {
  filter: EventFilter,
  cache: NotificationCache,
  queue: DispatchQueue,
}

impl EventSink {
  pub fn new(filter: EventFilter, cache: NotificationCache, queue: DispatchQueue) -> Self {
    Self { filter, cache, queue }
  }

  /// Handle an added or updated event. Returns `true` if it was enqueued.
  pub fn apply<E: EventObject + ?Sized>(&self, obj: &E) -> bool {
    if !self.filter.admit(obj) {
      return false;
    }
    let Some(event) = NotificationEvent::from_object(obj) else {
      return false;
    };

    let name = event.name.clone();
    self.cache.insert(event);
    self.queue.add(name);
    true
  }

  /// Handle a deleted event
  pub fn delete<E: EventObject + ?Sized>(&self, obj: &E) {
    if self.filter.admit(obj)
      && let Some(name) = obj.event_name()
    {
      self.cache.remove(name);
    }
  }

  /// Signal that the initial listing has been delivered
  pub fn mark_synced(&self) {
    if !self.cache.has_synced() {
      tracing::info!("Event cache synced ({} events in {})", self.cache.len(), self.filter.namespace());
    }
    self.cache.mark_synced();
  }
}
