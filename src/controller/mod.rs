//! Watch-and-count controller
//!
//! - `cache` - Admitted events keyed by name, plus the initial-sync flag
//! - `filter` - Namespace filter applied before anything is queued
//! - `queue` - Deduplicating, rate-limited work queue of event names
//! - `reconciler` - Resolves queued names and advances the counter
//! - `counter` - Exactly-once counter and the completion detector
//! - `reporter` - Periodic progress lines
//! - `cancel` - The one-shot cancellation signal shared by every task

mod cache;
mod cancel;
mod counter;
mod filter;
mod queue;
mod reconciler;
mod reporter;

pub use cache::NotificationCache;
pub use cancel::{CancelReason, CancellationSignal};
pub use counter::{Advance, CompletionCounter, CompletionDetector};
pub use filter::EventFilter;
pub use queue::{DispatchQueue, ItemBackoff};
pub use reconciler::{ReconcileError, Reconciled, Reconciler, process_next, run_worker};
pub use reporter::{Progress, Reporter};
