//! Completion counter and detector
//!
//! The counter advances once per distinct event name. The membership check and
//! the increment happen under one write lock, so two workers can never both
//! observe the same value.

use std::collections::HashSet;

use parking_lot::RwLock;

use super::cancel::{CancelReason, CancellationSignal};

/// Outcome of [`CompletionCounter::try_advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
  /// Counter value after the call
  pub value: u32,
  /// Whether this call advanced the counter
  pub advanced: bool,
}

#[derive(Default)]
struct CounterState {
  value: u32,
  counted: HashSet<String>,
}

/// Monotonic counter of distinct qualifying events
pub struct CompletionCounter {
  target: u32,
  state: RwLock<CounterState>,
}

impl CompletionCounter {
  pub fn new(target: u32) -> Self {
    Self {
      target,
      state: RwLock::new(CounterState::default()),
    }
  }

  pub fn target(&self) -> u32 {
    self.target
  }

  /// Advance by one unless `event_name` has already been counted
  pub fn try_advance(&self, event_name: &str) -> Advance {
    let mut state = self.state.write();
    if state.counted.contains(event_name) {
      return Advance {
        value: state.value,
        advanced: false,
      };
    }

    state.counted.insert(event_name.to_string());
    state.value += 1;
    Advance {
      value: state.value,
      advanced: true,
    }
  }

  pub fn get(&self) -> u32 {
    self.state.read().value
  }

  pub fn reached_target(&self) -> bool {
    self.get() >= self.target
  }
}

/// Fires the cancellation signal when the counter reaches its target
#[derive(Clone)]
pub struct CompletionDetector {
  target: u32,
  signal: CancellationSignal,
}

impl CompletionDetector {
  pub fn new(target: u32, signal: CancellationSignal) -> Self {
    Self { target, signal }
  }

  /// Inspect an advance. Returns `true` if this advance fired the signal.
  pub fn observe(&self, advance: Advance) -> bool {
    if !advance.advanced || advance.value < self.target {
      return false;
    }

    let fired = self.signal.fire(CancelReason::TargetReached);
    if fired {
      tracing::info!("All {} replicas pulled the image", self.target);
    }
    fired
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_advances_once_per_name() {
    let counter = CompletionCounter::new(3);
    assert_eq!(counter.try_advance("a"), Advance { value: 1, advanced: true });
    assert_eq!(counter.try_advance("a"), Advance { value: 1, advanced: false });
    assert_eq!(counter.try_advance("a"), Advance { value: 1, advanced: false });
    assert_eq!(counter.get(), 1);
  }

  #[test]
  fn test_duplicates_do_not_inflate_total() {
    let counter = CompletionCounter::new(4);
    let names = ["a", "b", "a", "c", "b", "b", "d", "a"];
    for name in names {
      counter.try_advance(name);
    }
    assert_eq!(counter.get(), 4);
    assert!(counter.reached_target());
  }

  #[test]
  fn test_reached_target() {
    let counter = CompletionCounter::new(2);
    assert_eq!(counter.target(), 2);
    counter.try_advance("a");
    assert!(!counter.reached_target());
    counter.try_advance("b");
    assert!(counter.reached_target());
  }

  #[test]
  fn test_concurrent_advances_are_exact() {
    let counter = Arc::new(CompletionCounter::new(64));
    let advanced = AtomicU32::new(0);

    std::thread::scope(|s| {
      for worker in 0..8 {
        let counter = &counter;
        let advanced = &advanced;
        s.spawn(move || {
          // Every worker sees every name, as with redelivery to many workers
          for i in 0..64 {
            let name = format!("event-{}", (i + worker * 8) % 64);
            if counter.try_advance(&name).advanced {
              advanced.fetch_add(1, Ordering::Relaxed);
            }
          }
        });
      }
    });

    assert_eq!(counter.get(), 64);
    assert_eq!(advanced.load(Ordering::Relaxed), 64);
  }

  #[test]
  fn test_exactly_one_caller_sees_target() {
    let counter = CompletionCounter::new(32);
    let signal = CancellationSignal::new();
    let detector = CompletionDetector::new(32, signal.clone());
    let fired = AtomicU32::new(0);

    std::thread::scope(|s| {
      for worker in 0..4 {
        let counter = &counter;
        let detector = &detector;
        let fired = &fired;
        s.spawn(move || {
          for i in 0..32 {
            let advance = counter.try_advance(&format!("pod-{}", (i + worker) % 32));
            if detector.observe(advance) {
              fired.fetch_add(1, Ordering::Relaxed);
            }
          }
        });
      }
    });

    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert_eq!(signal.reason(), Some(CancelReason::TargetReached));
  }

  #[test]
  fn test_detector_ignores_non_advances() {
    let signal = CancellationSignal::new();
    let detector = CompletionDetector::new(1, signal.clone());
    assert!(!detector.observe(Advance { value: 1, advanced: false }));
    assert!(!signal.is_fired());
  }

  #[test]
  fn test_detector_fires_at_target_only() {
    let signal = CancellationSignal::new();
    let detector = CompletionDetector::new(2, signal.clone());
    assert!(!detector.observe(Advance { value: 1, advanced: true }));
    assert!(!signal.is_fired());
    assert!(detector.observe(Advance { value: 2, advanced: true }));
    assert!(!detector.observe(Advance { value: 3, advanced: true }));
    assert!(signal.is_fired());
  }

  #[test]
  fn test_detector_does_not_override_external_cancel() {
    let signal = CancellationSignal::new();
    signal.fire(CancelReason::ExternalSignal);
    let detector = CompletionDetector::new(1, signal.clone());
    assert!(!detector.observe(Advance { value: 1, advanced: true }));
    assert_eq!(signal.reason(), Some(CancelReason::ExternalSignal));
  }
}
