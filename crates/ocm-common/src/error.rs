//! Errors raised by the shared operator plumbing
//!
//! Every variant names what it was raised for: the kind being decoded or
//! the subsystem.

use thiserror::Error;

/// Error of the shared crates
#[derive(Debug, Error)]
pub enum Error {
    /// Request to the API server failed
    #[error("api request failed: {source}")]
    Kube {
        /// Client error
        #[from]
        source: kube::Error,
    },

    /// A manifest or object could not be encoded or decoded
    #[error("cannot encode or decode object: {message}")]
    Serialization {
        /// Decoder message
        message: String,
        /// Kind of the object, when known
        kind: Option<String>,
    },

    /// Anything else that went wrong inside the operator
    #[error("{context}: {message}")]
    Internal {
        /// What failed
        message: String,
        /// Subsystem, e.g. `telemetry`
        context: String,
    },
}

impl Error {
    /// Decoding error of an unknown kind
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Decoding error of `kind`
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Internal error of `context`
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the operation that produced this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } | Self::Internal { .. } => true,
            Self::Serialization { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
