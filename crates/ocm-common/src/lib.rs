//! Common types for the OCM operators: CRDs, errors, events and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the operator CRDs (`Klusterlet`, `ClusterManager`)
pub const OPERATOR_GROUP: &str = "operator.open-cluster-management.io";

/// Namespace the klusterlet agents run in when the spec leaves it empty
pub const DEFAULT_AGENT_NAMESPACE: &str = "open-cluster-management-agent";

/// Namespace holding the hub control plane components
pub const HUB_NAMESPACE: &str = "open-cluster-management-hub";
