//! Reconciliation core shared by the OCM controllers
//!
//! - [`apply`]: idempotent create/update/delete of rendered subordinates
//! - [`generation`]: per-subordinate generation tracking for drift detection
//! - [`conditions`]: aggregation of health signals into status conditions
//! - [`scheduler`]: deduplicating work queue and controller worker loop
//! - [`manifest`]: embedded manifest rendering and typed decoding
//! - [`store`]: object store abstraction over the Kubernetes API

#![deny(missing_docs)]

pub mod apply;
pub mod conditions;
pub mod error;
pub mod generation;
pub mod manifest;
pub mod scheduler;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
