use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::cancel::CancellationSignal;
use super::counter::CompletionCounter;

/// Progress snapshot emitted by the reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
  pub desired: u32,
  pub observed: u32,
  pub elapsed: Duration,
}

impl std::fmt::Display for Progress {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "desired={} now={} elapsed={:.1?}",
      self.desired, self.observed, self.elapsed
    )
  }
}

/// Reads the counter on a fixed period until the run is cancelled
pub struct Reporter {
  counter: Arc<CompletionCounter>,
  period: Duration,
  started_at: Instant,
}

impl Reporter {
  pub fn new(counter: Arc<CompletionCounter>, period: Duration, started_at: Instant) -> Self {
    Self {
      counter,
      period,
      started_at,
    }
  }

  /// Emit progress every period; the first report comes one period after start
  pub async fn run<F>(self, signal: CancellationSignal, mut emit: F)
  where
    F: FnMut(Progress) + Send,
  {
    let mut ticker = interval_at(Instant::now() + self.period, self.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        () = signal.cancelled() => break,
        _ = ticker.tick() => {
          let progress = Progress {
            desired: self.counter.target(),
            observed: self.counter.get(),
            elapsed: self.started_at.elapsed(),
          };
          emit(progress);
        }
      }
    }
  }
}
