//! One-shot cancellation shared by every task of a run
//!
//! Firing is a single compare-and-swap on the `fired` flag, so only the first
//! caller records a reason and wakes the waiters. Later calls are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
  /// Every desired replica reported a pull
  TargetReached,
  /// The process received a termination signal
  ExternalSignal,
  /// Setup failed after the event source was started
  Aborted,
}

impl std::fmt::Display for CancelReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CancelReason::TargetReached => write!(f, "target reached"),
      CancelReason::ExternalSignal => write!(f, "external signal"),
      CancelReason::Aborted => write!(f, "aborted"),
    }
  }
}

#[derive(Default)]
struct Inner {
  fired: AtomicBool,
  reason: OnceLock<CancelReason>,
  token: CancellationToken,
}

/// Cloneable handle to the run's cancellation signal
#[derive(Clone, Default)]
pub struct CancellationSignal {
  inner: Arc<Inner>,
}

impl CancellationSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fire the signal. Returns `true` only for the call that actually fired it.
  pub fn fire(&self, reason: CancelReason) -> bool {
    if self
      .inner
      .fired
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return false;
    }

    let _ = self.inner.reason.set(reason);
    tracing::debug!("Cancellation fired: {reason}");
    self.inner.token.cancel();
    true
  }

  pub fn is_fired(&self) -> bool {
    self.inner.fired.load(Ordering::Acquire)
  }

  /// Reason recorded by the firing call
  pub fn reason(&self) -> Option<CancelReason> {
    self.inner.reason.get().copied()
  }

  /// Wait until the signal fires
  pub async fn cancelled(&self) {
    self.inner.token.cancelled().await;
  }
}

impl std::fmt::Debug for CancellationSignal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancellationSignal")
      .field("fired", &self.is_fired())
      .field("reason", &self.reason())
      .finish()
  }
}
