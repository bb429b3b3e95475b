//! Error types for the registry.

use std::time::Duration;

use capseal_core::{CapabilityId, CoreError, Identity, TxId};
use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No capability was ever recorded under this ID.
    #[error("capability not found: {0}")]
    NotFound(CapabilityId),

    /// The caller may not perform this write.
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Identity,
        action: &'static str,
    },

    /// The caller is not in the capability's grant set.
    #[error("access to capability {id} denied for {caller}")]
    AccessDenied { id: CapabilityId, caller: Identity },

    /// The content pointer can only be set once.
    #[error("content pointer already set for capability {0}")]
    PointerAlreadySet(CapabilityId),

    /// The transaction was included but failed at execution.
    #[error("transaction {tx} reverted: {reason}")]
    Reverted { tx: TxId, reason: String },

    /// The ledger went away before the transaction was sealed.
    #[error("transaction {0} dropped before confirmation")]
    Dropped(TxId),

    /// The transaction was not sealed in time.
    #[error("transaction {tx} not confirmed within {timeout:?}")]
    Unconfirmed { tx: TxId, timeout: Duration },

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record or event serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RegistryError {
    /// Whether this error comes from the backing store rather than contract rules.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            RegistryError::Database(_)
                | RegistryError::Serialization(_)
                | RegistryError::InvalidData(_)
                | RegistryError::Migration(_)
        )
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
