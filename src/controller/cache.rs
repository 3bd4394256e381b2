//! Process-local store of admitted events, keyed by event name
//!
//! Written by the event source, read by the reconcile workers. The `synced`
//! flag flips once the source has delivered its initial listing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::kubernetes::NotificationEvent;

#[derive(Clone)]
pub struct NotificationCache {
  events: Arc<RwLock<HashMap<String, NotificationEvent>>>,
  synced_tx: Arc<watch::Sender<bool>>,
}

impl Default for NotificationCache {
  fn default() -> Self {
    Self::new()
  }
}

impl NotificationCache {
  pub fn new() -> Self {
    let (synced_tx, _) = watch::channel(false);
    Self {
      events: Arc::new(RwLock::new(HashMap::new())),
      synced_tx: Arc::new(synced_tx),
    }
  }

  /// Insert or replace an event
  pub fn insert(&self, event: NotificationEvent) {
    self.events.write().insert(event.name.clone(), event);
  }

  pub fn remove(&self, name: &str) -> Option<NotificationEvent> {
    self.events.write().remove(name)
  }

  pub fn get(&self, name: &str) -> Option<NotificationEvent> {
    self.events.read().get(name).cloned()
  }

  pub fn len(&self) -> usize {
    self.events.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.read().is_empty()
  }

  /// Record that the initial listing has been delivered
  pub fn mark_synced(&self) {
    self.synced_tx.send_replace(true);
  }

  pub fn has_synced(&self) -> bool {
    *self.synced_tx.borrow()
  }

  /// Wait until the initial listing has been delivered
  pub async fn wait_synced(&self) {
    let mut rx = self.synced_tx.subscribe();
    // The sender lives in `self`, so the channel cannot close while we wait
    let _ = rx.wait_for(|synced| *synced).await;
  }
}
