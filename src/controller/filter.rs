use crate::kubernetes::EventObject;

/// Admits only events from the target namespace
#[derive(Debug, Clone)]
pub struct EventFilter {
  namespace: String,
}

impl EventFilter {
  pub fn new(namespace: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Objects without a name or namespace are rejected
  pub fn admit<E: EventObject + ?Sized>(&self, event: &E) -> bool {
    let has_name = event.event_name().is_some_and(|n| !n.is_empty());
    has_name && event.event_namespace() == Some(self.namespace.as_str())
  }
}
