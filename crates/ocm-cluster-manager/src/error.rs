//! Errors returned by the cluster-manager controllers

use thiserror::Error;

/// Error from a cluster-manager reconcile
#[derive(Debug, Error)]
pub enum ClusterManagerError {
    /// Apply, store or manifest failure
    #[error("{0}")]
    Reconcile(#[from] ocm_reconcile::Error),

    /// Shared helper failure
    #[error("{0}")]
    Common(#[from] ocm_common::Error),
}

impl ClusterManagerError {
    /// Whether a retry may succeed without a change to the ClusterManager
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reconcile(e) => e.is_retryable(),
            Self::Common(e) => e.is_retryable(),
        }
    }
}

/// Result type for cluster-manager controllers
pub type Result<T> = std::result::Result<T, ClusterManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_source_error() {
        let conflict: ClusterManagerError =
            ocm_reconcile::Error::conflict("StorageVersionMigration/x", "stale").into();
        assert!(conflict.is_retryable());

        let invalid: ClusterManagerError =
            ocm_reconcile::Error::invalid("StorageVersionMigration", "no name").into();
        assert!(!invalid.is_retryable());
        assert!(invalid.to_string().contains("no name"));
    }
}
