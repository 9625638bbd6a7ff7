//! Reconcile scheduling: deduplicating queue, backoff and worker loop

mod backoff;
mod controller;
mod queue;

pub use backoff::Backoff;
pub use controller::{Action, Controller};
pub use queue::{KeyState, QueueKey, WorkQueue};
