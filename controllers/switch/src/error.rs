//! Controller-specific error types.
//!
//! Unresolved-but-valid situations (a level that cannot be computed yet, a
//! subnet still being reserved) are not errors and never show up here; they
//! are reflected in the switch status and retried on the fixed interval.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Switch Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic concurrency check failed (object changed since it was read)
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// IPAM request could not be created, read or deleted
    #[error("IPAM error: {0}")]
    Ipam(String),

    /// Per-port address could not be derived from the south subnet
    #[error("Address derivation failed: {0}")]
    AddressDerivation(String),

    /// External resources could not be released during deletion
    #[error("Resource release failed: {0}")]
    ResourceRelease(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error is an optimistic-concurrency conflict.
    ///
    /// Conflicts are expected under concurrent passes and are retried from
    /// fresh state without counting towards the error backoff.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(response)) => response.code == 409,
            _ => false,
        }
    }
}
