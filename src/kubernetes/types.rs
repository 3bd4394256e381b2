use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event as CoreEvent;
use k8s_openapi::api::events::v1::Event as EventsV1Event;

/// Reason reported by the kubelet once a container image has been pulled
pub const IMAGE_PULLED: &str = "Pulled";

/// Event API served by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSchema {
  /// `events.k8s.io/v1`
  #[default]
  EventsV1,
  /// Legacy `core/v1` events (`involvedObject` reference)
  CoreV1,
}

impl EventSchema {
  /// Pick the schema from the preferred version of the `events.k8s.io` group.
  ///
  /// Clusters that do not serve `events.k8s.io/v1` fall back to the core events API,
  /// which every apiserver still serves.
  pub fn from_preferred_version(version: Option<&str>) -> Self {
    match version {
      Some("v1") => EventSchema::EventsV1,
      _ => EventSchema::CoreV1,
    }
  }
}

impl std::fmt::Display for EventSchema {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EventSchema::EventsV1 => write!(f, "events.k8s.io/v1"),
      EventSchema::CoreV1 => write!(f, "v1"),
    }
  }
}

/// Logical view over the event schemas the watcher can receive.
///
/// Every accessor is optional because objects coming off the wire may be
/// incomplete; callers treat a missing name or namespace as malformed.
pub trait EventObject {
  fn event_name(&self) -> Option<&str>;
  fn event_namespace(&self) -> Option<&str>;
  fn reason(&self) -> Option<&str>;
  fn involved_object_name(&self) -> Option<&str>;
}

impl EventObject for EventsV1Event {
  fn event_name(&self) -> Option<&str> {
    self.metadata.name.as_deref()
  }

  fn event_namespace(&self) -> Option<&str> {
    self.metadata.namespace.as_deref()
  }

  fn reason(&self) -> Option<&str> {
    self.reason.as_deref()
  }

  fn involved_object_name(&self) -> Option<&str> {
    self.regarding.as_ref().and_then(|r| r.name.as_deref())
  }
}

impl EventObject for CoreEvent {
  fn event_name(&self) -> Option<&str> {
    self.metadata.name.as_deref()
  }

  fn event_namespace(&self) -> Option<&str> {
    self.metadata.namespace.as_deref()
  }

  fn reason(&self) -> Option<&str> {
    self.reason.as_deref()
  }

  fn involved_object_name(&self) -> Option<&str> {
    self.involved_object.name.as_deref()
  }
}

/// Schema-independent snapshot of a cluster event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
  pub name: String,
  pub namespace: String,
  pub reason: String,
  pub involved_object: String,
  pub received_at: DateTime<Utc>,
}

impl NotificationEvent {
  /// Snapshot any event object, or `None` if it has no name or namespace
  pub fn from_object<E: EventObject + ?Sized>(obj: &E) -> Option<Self> {
    let name = obj.event_name().filter(|n| !n.is_empty())?;
    let namespace = obj.event_namespace().filter(|n| !n.is_empty())?;

    Some(Self {
      name: name.to_string(),
      namespace: namespace.to_string(),
      reason: obj.reason().unwrap_or_default().to_string(),
      // Pod events are named `<pod>.<suffix>`, so the event name still carries the pod name
      involved_object: obj.involved_object_name().unwrap_or(name).to_string(),
      received_at: Utc::now(),
    })
  }

  /// Whether this event reports an image pull for a pod of `workload`.
  ///
  /// Deployment pods are named `<workload>-<hash>-<hash>`.
  pub fn is_image_pulled_for(&self, workload: &str) -> bool {
    self.reason == IMAGE_PULLED
      && self
        .involved_object
        .strip_prefix(workload)
        .is_some_and(|rest| rest.starts_with('-'))
  }
}

impl EventObject for NotificationEvent {
  fn event_name(&self) -> Option<&str> {
    Some(&self.name)
  }

  fn event_namespace(&self) -> Option<&str> {
    Some(&self.namespace)
  }

  fn reason(&self) -> Option<&str> {
    Some(&self.reason)
  }

  fn involved_object_name(&self) -> Option<&str> {
    Some(&self.involved_object)
  }
}
