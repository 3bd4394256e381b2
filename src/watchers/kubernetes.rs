//! Cluster event watcher
//!
//! Watches the events API selected at startup and feeds every delivery into the
//! [`EventSink`]. The watch is re-established with exponential backoff after
//! stream errors; a re-list redelivers events already seen, which the queue and
//! the counter absorb.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Event as CoreEvent;
use k8s_openapi::api::events::v1::Event as EventsV1Event;
use kube::runtime::watcher::{self, Event as WatchEvent};
use kube::{Api, Client, Resource};

use super::{EventSink, EventSource};
use crate::controller::CancellationSignal;
use crate::kubernetes::{EventObject, EventSchema};

/// Backoff configuration for reconnection
struct Backoff {
  initial: Duration,
  current: Duration,
  max: Duration,
}

impl Backoff {
  fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      current: initial,
      max,
    }
  }

  fn next_delay(&mut self) -> Duration {
    let delay = self.current;
    self.current = (self.current * 2).min(self.max);
    delay
  }

  fn reset(&mut self) {
    self.current = self.initial;
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::new(Duration::from_secs(1), Duration::from_secs(60))
  }
}

/// Event source backed by the Kubernetes watch API
pub struct KubeEventSource {
  client: Client,
  schema: EventSchema,
}

impl KubeEventSource {
  pub fn new(client: Client, schema: EventSchema) -> Self {
    Self { client, schema }
  }
}

impl EventSource for KubeEventSource {
  async fn run(self, sink: EventSink, signal: CancellationSignal) {
    tracing::info!("Watching {} events", self.schema);
    match self.schema {
      EventSchema::EventsV1 => watch_events::<EventsV1Event>(self.client, sink, signal).await,
      EventSchema::CoreV1 => watch_events::<CoreEvent>(self.client, sink, signal).await,
    }
  }
}

/// Watch one event schema until cancelled, reconnecting on failure
async fn watch_events<K>(client: Client, sink: EventSink, signal: CancellationSignal)
where
  K: Resource<DynamicType = ()>
    + EventObject
    + Clone
    + std::fmt::Debug
    + Send
    + Sync
    + serde::de::DeserializeOwned
    + 'static,
{
  let api: Api<K> = Api::all(client);
  let type_name = std::any::type_name::<K>().split("::").last().unwrap_or("Event");
  let mut backoff = Backoff::default();
  let mut consecutive_failures = 0u32;

  while !signal.is_fired() {
    match run_watcher(&api, &sink, &signal).await {
      Ok(()) => {
        backoff.reset();
        consecutive_failures = 0;
        if !signal.is_fired() {
          tracing::debug!("{type_name} watcher stream ended, reconnecting...");
        }
      }
      Err(e) => {
        consecutive_failures += 1;
        let delay = backoff.next_delay();
        tracing::warn!("{type_name} watcher error (attempt {consecutive_failures}): {e}, retrying in {delay:?}");
        tokio::select! {
          () = signal.cancelled() => break,
          () = tokio::time::sleep(delay) => {}
        }
      }
    }
  }

  tracing::debug!("{type_name} watcher stopped");
}

/// Run one watch stream until it ends, fails or the run is cancelled
async fn run_watcher<K>(api: &Api<K>, sink: &EventSink, signal: &CancellationSignal) -> Result<()>
where
  K: Resource<DynamicType = ()>
    + EventObject
    + Clone
    + std::fmt::Debug
    + Send
    + Sync
    + serde::de::DeserializeOwned
    + 'static,
{
  let stream = watcher::watcher(api.clone(), watcher::Config::default());
  futures::pin_mut!(stream);

  loop {
    tokio::select! {
      () = signal.cancelled() => return Ok(()),
      event = stream.next() => {
        match event {
          Some(Ok(watch_event)) => handle_event(sink, watch_event),
          Some(Err(e)) => return Err(anyhow::anyhow!("Watch error: {e}")),
          None => return Ok(()),
        }
      }
    }
  }
}

fn handle_event<K: EventObject>(sink: &EventSink, event: WatchEvent<K>) {
  match event {
    WatchEvent::Init => tracing::debug!("Listing events"),
    WatchEvent::InitApply(obj) | WatchEvent::Apply(obj) => {
      sink.apply(&obj);
    }
    WatchEvent::Delete(obj) => sink.delete(&obj),
    WatchEvent::InitDone => sink.mark_synced(),
  }
}
