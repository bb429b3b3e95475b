//! Error types for the vault.
//!
//! [`VaultError`] is the only error callers see. [`VaultError::kind`] sorts
//! every failure into one [`ErrorKind`], which is what retry and display
//! decisions should look at.

use capseal_auth::ChallengeError;
use capseal_core::{CapabilityId, CoreError};
use capseal_gateway::{GatewayError, NetworkError};
use capseal_registry::RegistryError;
use thiserror::Error;

/// Classification of vault failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The capability does not exist.
    NotFound,
    /// The caller may not perform this write.
    Unauthorized,
    /// The predicate evaluated to false for the caller.
    AccessDenied,
    /// The challenge was rejected; issue a fresh one.
    ChallengeInvalid,
    /// Tampering or a build defect.
    BundleCorrupt,
    NetworkUnavailable,
    /// A transaction did not reach finality in time.
    Unconfirmed,
    InvalidPredicate,
    SigningDeclined,
    NoSigningCapability,
    /// A capability exists but its secret was never persisted.
    Unsealed,
    Storage,
}

impl ErrorKind {
    /// Whether trying again (after re-issuing or resuming) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkUnavailable
                | ErrorKind::Unconfirmed
                | ErrorKind::ChallengeInvalid
                | ErrorKind::Unsealed
        )
    }
}

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("challenge error: {0}")]
    Challenge(#[from] ChallengeError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The signer cannot act for any identity.
    #[error("signer has no identity")]
    NoSigningCapability,

    /// The stored pointer is neither pending nor a valid sealed payload.
    #[error("invalid content pointer for capability {id}: {reason}")]
    InvalidPointer { id: CapabilityId, reason: String },

    /// The stored bundle is gated by a different predicate than its capability.
    #[error("bundle for capability {id} is bound to another predicate")]
    PredicateMismatch { id: CapabilityId },

    /// The capability was created but sealing did not complete.
    #[error("capability {capability_id} created but not sealed: {source}")]
    Unsealed {
        capability_id: CapabilityId,
        #[source]
        source: Box<VaultError>,
    },
}

impl From<NetworkError> for VaultError {
    fn from(err: NetworkError) -> Self {
        VaultError::Gateway(err.into())
    }
}

impl VaultError {
    /// The taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Registry(err) => registry_kind(err),
            VaultError::Gateway(err) => match err {
                GatewayError::InvalidPredicate(_) => ErrorKind::InvalidPredicate,
                GatewayError::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
                GatewayError::ChallengeInvalid(_) => ErrorKind::ChallengeInvalid,
                GatewayError::AccessDenied { .. } => ErrorKind::AccessDenied,
                GatewayError::NotFound(_) => ErrorKind::NotFound,
                GatewayError::BundleCorrupt(_)
                | GatewayError::Encryption(_)
                | GatewayError::Serialization(_) => ErrorKind::BundleCorrupt,
            },
            VaultError::Challenge(err) => match err {
                ChallengeError::NoSigningCapability => ErrorKind::NoSigningCapability,
                ChallengeError::SigningDeclined | ChallengeError::SignerFailed(_) => {
                    ErrorKind::SigningDeclined
                }
                _ => ErrorKind::ChallengeInvalid,
            },
            VaultError::Core(CoreError::InvalidPredicate(_)) => ErrorKind::InvalidPredicate,
            VaultError::Core(_) => ErrorKind::Storage,
            VaultError::NoSigningCapability => ErrorKind::NoSigningCapability,
            VaultError::InvalidPointer { .. } | VaultError::PredicateMismatch { .. } => {
                ErrorKind::BundleCorrupt
            }
            VaultError::Unsealed { .. } => ErrorKind::Unsealed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Capability left behind by a failed seal, if any.
    pub fn unsealed_capability(&self) -> Option<CapabilityId> {
        match self {
            VaultError::Unsealed { capability_id, .. } => Some(*capability_id),
            _ => None,
        }
    }

    /// Text suitable for an end user. Denials read differently from faults.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::AccessDenied => {
                "Access denied: only the owner or creator of this secret can reveal it.".into()
            }
            ErrorKind::NotFound => "This secret does not exist.".into(),
            ErrorKind::Unauthorized => "You are not allowed to change this secret.".into(),
            ErrorKind::SigningDeclined => "The signature request was declined.".into(),
            ErrorKind::NoSigningCapability => "Connect a signer to continue.".into(),
            ErrorKind::Unsealed => match self.unsealed_capability() {
                Some(id) => format!("Secret #{id} was created but not sealed. Try sealing it again."),
                None => "The secret was created but not sealed. Try sealing it again.".into(),
            },
            _ => format!("Something went wrong: {self}"),
        }
    }
}

fn registry_kind(err: &RegistryError) -> ErrorKind {
    match err {
        RegistryError::NotFound(_) => ErrorKind::NotFound,
        RegistryError::Unauthorized { .. } | RegistryError::PointerAlreadySet(_) => {
            ErrorKind::Unauthorized
        }
        RegistryError::AccessDenied { .. } => ErrorKind::AccessDenied,
        RegistryError::Dropped(_) | RegistryError::Unconfirmed { .. } => ErrorKind::Unconfirmed,
        RegistryError::Core(CoreError::InvalidPredicate(_)) => ErrorKind::InvalidPredicate,
        RegistryError::Reverted { .. }
        | RegistryError::Database(_)
        | RegistryError::Serialization(_)
        | RegistryError::InvalidData(_)
        | RegistryError::Migration(_)
        | RegistryError::Core(_) => ErrorKind::Storage,
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
