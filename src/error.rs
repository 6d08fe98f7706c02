//! Error types for the hcp-deployer controller
//!
//! Errors fall into four families: input errors that wait for a spec edit
//! (`Validation`, `Reference`), transient collaborator failures that are
//! retried by requeue (`Kube`, `Provisioner`), aggregated reference resolution
//! failures (`Synthesis`), and internal bookkeeping failures.

use thiserror::Error;

/// Main error type for hcp-deployer operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Missing or invalid spec input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.infrastructure.platform.aws.region")
        field: Option<String>,
    },

    /// An object reference could not be honored (missing object, mismatched fields)
    #[error("reference error: {message}")]
    Reference {
        /// User-visible description of the mismatch
        message: String,
    },

    /// One or more configuration references could not be resolved
    #[error("unresolved references: {}", messages.join("; "))]
    Synthesis {
        /// One entry per unresolved reference
        messages: Vec<String>,
    },

    /// Infrastructure provisioner failure
    #[error("provisioner error [{platform}/{operation}]: {message}")]
    Provisioner {
        /// Cloud platform (aws, azure)
        platform: String,
        /// Operation that failed (create-infra, create-iam, destroy-infra, destroy-iam)
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a spec field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a reference error
    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference {
            message: msg.into(),
        }
    }

    /// Create an aggregate synthesis error
    pub fn synthesis(messages: Vec<String>) -> Self {
        Self::Synthesis { messages }
    }

    /// Create a provisioner error
    pub fn provisioner(
        platform: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provisioner {
            platform: platform.into(),
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    ///
    /// Validation and reference errors wait for a spec edit. Unresolved
    /// references are retried because the missing objects may appear later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Reference { .. } => false,
            Error::Synthesis { .. } => true,
            Error::Provisioner { .. } => true,
            Error::Serialization(_) => false,
            Error::Internal(_) => true,
        }
    }

    /// True when this is an optimistic-concurrency conflict (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True when the API reported the object as missing (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Build a kube API error with the given HTTP code
///
/// Used to surface store-level conditions (not found, conflict) through the
/// same `kube::Error` shape the real API server produces.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::Kube {
        source: kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: message.into(),
            reason: reason.to_string(),
            code,
        }),
    }
}
