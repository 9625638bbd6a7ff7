//! Managed-cluster controllers for the Klusterlet resource
//!
//! - [`controller`]: renders and applies the registration and work agents
//! - [`status`]: hub connection and agent health conditions
//! - [`bootstrap`]: restarts the agents when the hub connection goes stale
//! - [`secrets`]: reading the bootstrap and hub kubeconfig secrets

#![deny(missing_docs)]

pub mod bootstrap;
pub mod controller;
pub mod error;
pub mod manifests;
pub mod secrets;
pub mod status;

pub use error::{KlusterletError, Result};
