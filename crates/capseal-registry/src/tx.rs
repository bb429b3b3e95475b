//! Ledger calls, events, and the receipts that confirm them.

use std::fmt;
use std::time::Duration;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use capseal_core::canonical::{canonical_encode, int_map};
use capseal_core::{Blake3Hash, BlockNumber, CapabilityId, Identity, TxId};

use crate::error::{RegistryError, Result};

/// A state-changing call submitted to the registry contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    /// Allocate the next capability ID for the caller.
    Create,
    /// Record where the sealed content lives. Owner only, once.
    SetContentPointer { id: CapabilityId, pointer: String },
    /// Hand ownership to another identity. Owner only.
    Transfer { id: CapabilityId, to: Identity },
}

impl LedgerCall {
    /// Short name used in logs and authorization errors.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCall::Create => "create",
            LedgerCall::SetContentPointer { .. } => "set content pointer",
            LedgerCall::Transfer { .. } => "transfer",
        }
    }

    /// The capability this call touches, if any.
    pub fn capability_id(&self) -> Option<CapabilityId> {
        match self {
            LedgerCall::Create => None,
            LedgerCall::SetContentPointer { id, .. } | LedgerCall::Transfer { id, .. } => {
                Some(*id)
            }
        }
    }

    /// Transaction ID: Blake3 over the canonical `(caller, call, nonce)`.
    pub fn tx_id(&self, caller: &Identity, nonce: u64) -> Result<TxId> {
        let call = match self {
            LedgerCall::Create => int_map(vec![(0, Value::Integer(0.into()))]),
            LedgerCall::SetContentPointer { id, pointer } => int_map(vec![
                (0, Value::Integer(1.into())),
                (1, Value::Integer(id.get().into())),
                (2, Value::Text(pointer.clone())),
            ]),
            LedgerCall::Transfer { id, to } => int_map(vec![
                (0, Value::Integer(2.into())),
                (1, Value::Integer(id.get().into())),
                (2, Value::Bytes(to.as_bytes().to_vec())),
            ]),
        };
        let value = int_map(vec![
            (0, Value::Bytes(caller.as_bytes().to_vec())),
            (1, call),
            (2, Value::Integer(nonce.into())),
        ]);
        let bytes = canonical_encode(&value)?;
        Ok(TxId::from_bytes(Blake3Hash::hash(&bytes).0))
    }
}

/// An event emitted by an executed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    CapabilityCreated {
        id: CapabilityId,
        creator: Identity,
    },
    ContentPointerSet {
        id: CapabilityId,
    },
    OwnershipTransferred {
        id: CapabilityId,
        from: Identity,
        to: Identity,
    },
}

impl LedgerEvent {
    pub fn capability_id(&self) -> CapabilityId {
        match self {
            LedgerEvent::CapabilityCreated { id, .. }
            | LedgerEvent::ContentPointerSet { id }
            | LedgerEvent::OwnershipTransferred { id, .. } => *id,
        }
    }
}

/// Why an included transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    NotFound(CapabilityId),
    Unauthorized {
        caller: Identity,
        action: &'static str,
    },
    PointerAlreadySet(CapabilityId),
    Failed(String),
}

impl RevertReason {
    /// Capture the reason from an execution error.
    pub fn from_error(err: &RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => RevertReason::NotFound(*id),
            RegistryError::Unauthorized { caller, action } => RevertReason::Unauthorized {
                caller: *caller,
                action: *action,
            },
            RegistryError::PointerAlreadySet(id) => RevertReason::PointerAlreadySet(*id),
            other => RevertReason::Failed(other.to_string()),
        }
    }

    /// Turn the reason back into the error a direct call would have raised.
    pub fn into_error(self, tx: TxId) -> RegistryError {
        match self {
            RevertReason::NotFound(id) => RegistryError::NotFound(id),
            RevertReason::Unauthorized { caller, action } => {
                RegistryError::Unauthorized { caller, action }
            }
            RevertReason::PointerAlreadySet(id) => RegistryError::PointerAlreadySet(id),
            RevertReason::Failed(reason) => RegistryError::Reverted { tx, reason },
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::NotFound(id) => write!(f, "capability {id} not found"),
            RevertReason::Unauthorized { caller, action } => {
                write!(f, "{caller} not authorized to {action}")
            }
            RevertReason::PointerAlreadySet(id) => {
                write!(f, "content pointer already set for {id}")
            }
            RevertReason::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted(RevertReason),
}

/// Proof that a transaction was sealed into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx: TxId,
    pub block: BlockNumber,
    pub status: TxStatus,
    pub events: Vec<LedgerEvent>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }

    /// Fail with the revert reason if the transaction did not succeed.
    pub fn into_success(self) -> Result<Self> {
        match self.status {
            TxStatus::Success => Ok(self),
            TxStatus::Reverted(reason) => Err(reason.into_error(self.tx)),
        }
    }

    /// The ID allocated by a successful `Create`.
    pub fn created_capability(&self) -> Option<CapabilityId> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::CapabilityCreated { id, .. } => Some(*id),
            _ => None,
        })
    }
}

/// A submitted transaction awaiting inclusion.
///
/// Resolves exactly once, when the block containing it is sealed.
#[derive(Debug)]
pub struct PendingTx {
    tx: TxId,
    receipt: oneshot::Receiver<TxReceipt>,
}

impl PendingTx {
    pub(crate) fn new(tx: TxId, receipt: oneshot::Receiver<TxReceipt>) -> Self {
        Self { tx, receipt }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx
    }

    /// Wait for the receipt, however long it takes.
    pub async fn confirmed(self) -> Result<TxReceipt> {
        self.receipt.await.map_err(|_| RegistryError::Dropped(self.tx))
    }

    /// Wait for the receipt, giving up after `timeout`.
    ///
    /// On timeout the transaction may still be sealed later; the receipt is
    /// simply no longer observed.
    pub async fn wait(self, timeout: Duration) -> Result<TxReceipt> {
        let tx = self.tx;
        match tokio::time::timeout(timeout, self.receipt).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(_)) => Err(RegistryError::Dropped(tx)),
            Err(_) => Err(RegistryError::Unconfirmed { tx, timeout }),
        }
    }
}
