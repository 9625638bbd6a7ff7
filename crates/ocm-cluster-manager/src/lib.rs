//! Hub-side controllers for the ClusterManager resource
//!
//! - [`migration`]: storage version migration requests for cluster-set resources
//! - [`status`]: `*Degraded` and `Available` conditions from the hub deployments

#![deny(missing_docs)]

pub mod error;
pub mod manifests;
pub mod migration;
pub mod status;

pub use error::{ClusterManagerError, Result};
