//! Error types for the NewDep Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The managed Deployment is not in a shape the operator can reconcile
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Object metadata lacks a field needed to build references
    #[error("Object is missing metadata field '{0}'")]
    MissingObjectKey(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Optimistic concurrency conflict (HTTP 409) from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Whether retrying the same reconciliation can succeed.
    ///
    /// Spec and object-shape problems need a change to the resource first.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Config(_)
                | Error::Validation(_)
                | Error::Precondition(_)
                | Error::MissingObjectKey(_)
        )
    }
}
