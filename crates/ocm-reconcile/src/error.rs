//! Error types for the reconciliation core
//!
//! Every variant names the resource or artifact it was raised for so that
//! an aggregate of many failures stays readable in a condition message.

use thiserror::Error;

/// Errors raised while rendering, applying or scheduling
#[derive(Debug, Error)]
pub enum Error {
    /// The object does not exist in the store
    #[error("{resource} not found")]
    NotFound {
        /// `Kind/namespace/name` of the missing object
        resource: String,
    },

    /// Optimistic concurrency failure or name collision
    #[error("conflict on {resource}: {message}")]
    Conflict {
        /// `Kind/namespace/name` of the contested object
        resource: String,
        /// Server-provided detail
        message: String,
    },

    /// Transport or API failure talking to the store
    #[error("store error on {resource}: {source}")]
    Store {
        /// `Kind/namespace/name` the request was for
        resource: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// The store could not serve the request (e.g. injected failure, timeout)
    #[error("store unavailable for {resource}: {message}")]
    Unavailable {
        /// `Kind/namespace/name` the request was for
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Rendering a named artifact failed or the artifact is unknown
    #[error("failed to render {artifact}: {message}")]
    Render {
        /// Artifact name
        artifact: String,
        /// Description of what failed
        message: String,
    },

    /// Rendered bytes did not decode into exactly one known object
    #[error("failed to decode {artifact}: {message}")]
    Decode {
        /// Artifact name (or "<inline>" for ad-hoc decodes)
        artifact: String,
        /// Description of what failed
        message: String,
    },

    /// A desired object is unusable (missing name, wrong shape)
    #[error("invalid desired object {resource}: {message}")]
    Invalid {
        /// Best-effort identity of the object
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Several independent operations failed
    #[error("{}", format_aggregate(.errors))]
    Aggregate {
        /// The individual failures, in the order they happened
        errors: Vec<Error>,
    },

    /// The reconcile was cancelled by shutdown
    #[error("reconcile cancelled")]
    Cancelled,

    /// Error from shared operator plumbing
    #[error(transparent)]
    Common(#[from] ocm_common::Error),
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Create a not-found error for a resource
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a conflict error for a resource
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an unavailable error for a resource
    pub fn unavailable(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a render error for an artifact
    pub fn render(artifact: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            artifact: artifact.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error for an artifact
    pub fn decode(artifact: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            artifact: artifact.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-object error
    pub fn invalid(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Invalid {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Map a kube-rs error to the store taxonomy for the given resource
    ///
    /// 404 becomes [`Error::NotFound`], 409 becomes [`Error::Conflict`].
    pub fn from_kube(resource: impl Into<String>, err: kube::Error) -> Self {
        let resource = resource.into();
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound { resource },
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict {
                resource,
                message: resp.message,
            },
            source => Self::Store { resource, source },
        }
    }

    /// Collapse a list of failures: `Ok(())` when empty, the sole error when
    /// there is one, an aggregate otherwise
    pub fn aggregate(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate { errors }),
        }
    }

    /// Whether the object was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is an optimistic concurrency failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the same reconcile can succeed
    ///
    /// An aggregate is retryable when any of its parts is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::Store { .. } | Self::Unavailable { .. } => true,
            Self::NotFound { .. } | Self::Cancelled => false,
            Self::Render { .. } | Self::Decode { .. } | Self::Invalid { .. } => false,
            Self::Aggregate { errors } => errors.iter().any(Error::is_retryable),
            Self::Common(e) => e.is_retryable(),
        }
    }
}
