//! Errors returned by the klusterlet controllers

use thiserror::Error;

/// Error from a klusterlet reconcile
#[derive(Debug, Error)]
pub enum KlusterletError {
    /// Apply, store or manifest failure
    #[error("{0}")]
    Reconcile(#[from] ocm_reconcile::Error),

    /// Shared helper failure (kubeconfig parsing, serialization)
    #[error("{0}")]
    Common(#[from] ocm_common::Error),

    /// A client certificate in a secret could not be parsed
    #[error("invalid certificate in secret {secret}: {message}")]
    Certificate {
        /// `namespace/name` of the secret
        secret: String,
        /// Parser detail
        message: String,
    },
}

impl KlusterletError {
    /// Create a certificate error
    pub fn certificate(secret: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Certificate {
            secret: secret.into(),
            message: message.into(),
        }
    }

    /// Whether a retry may succeed without a change to the inputs
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reconcile(e) => e.is_retryable(),
            Self::Common(e) => e.is_retryable(),
            Self::Certificate { .. } => false,
        }
    }
}

/// Result type for klusterlet controllers
pub type Result<T> = std::result::Result<T, KlusterletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_errors_name_the_secret() {
        let err = KlusterletError::certificate("agents/hub-kubeconfig-secret", "bad PEM");
        assert_eq!(
            err.to_string(),
            "invalid certificate in secret agents/hub-kubeconfig-secret: bad PEM"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_stay_retryable() {
        let err: KlusterletError =
            ocm_reconcile::Error::unavailable("Secret/agents/x", "timeout").into();
        assert!(err.is_retryable());
    }
}
