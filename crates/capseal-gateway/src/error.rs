//! Error types for the gateway and the decryption network.

use std::time::Duration;

use capseal_auth::ChallengeError;
use capseal_core::{CapabilityId, CoreError, Identity};
use thiserror::Error;

/// Errors reported by a decryption network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Not enough nodes answered.
    #[error("network unavailable: {0}")]
    Unavailable(String),

    #[error("network request timed out after {0:?}")]
    Timeout(Duration),

    /// The predicate does not describe a check this network can run.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("challenge rejected: {0}")]
    ChallengeRejected(#[source] ChallengeError),

    /// The predicate evaluated to false for the challenger.
    #[error("access to capability {id} denied for {identity:?}")]
    Denied { id: CapabilityId, identity: Identity },

    #[error("capability {0} does not exist")]
    UnknownCapability(CapabilityId),

    /// A node could not open its share: the bundle and request disagree.
    #[error("key share rejected: {0}")]
    ShareRejected(String),

    /// The network cannot be built from this configuration.
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
}

impl NetworkError {
    /// Only unavailability and timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Unavailable(_) | NetworkError::Timeout(_))
    }
}

/// Errors surfaced by the encryption gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("challenge invalid: {0}")]
    ChallengeInvalid(#[source] ChallengeError),

    #[error("access to capability {id} denied for {identity:?}")]
    AccessDenied { id: CapabilityId, identity: Identity },

    #[error("capability {0} does not exist")]
    NotFound(CapabilityId),

    /// Integrity failure: tampering or a build defect.
    #[error("ciphertext bundle corrupt: {0}")]
    BundleCorrupt(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<NetworkError> for GatewayError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Unavailable(reason) => GatewayError::NetworkUnavailable(reason),
            NetworkError::Timeout(after) => {
                GatewayError::NetworkUnavailable(format!("timed out after {after:?}"))
            }
            NetworkError::InvalidPredicate(reason) => GatewayError::InvalidPredicate(reason),
            NetworkError::ChallengeRejected(err) => GatewayError::ChallengeInvalid(err),
            NetworkError::Denied { id, identity } => GatewayError::AccessDenied { id, identity },
            NetworkError::UnknownCapability(id) => GatewayError::NotFound(id),
            NetworkError::ShareRejected(reason) => GatewayError::BundleCorrupt(reason),
            NetworkError::InvalidConfig(reason) => {
                GatewayError::NetworkUnavailable(format!("misconfigured: {reason}"))
            }
        }
    }
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidPredicate(reason) => GatewayError::InvalidPredicate(reason),
            other => GatewayError::Serialization(other.to_string()),
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
