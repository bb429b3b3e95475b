//! Capability records as held by the registry.

use serde::{Deserialize, Serialize};

use capseal_core::{BlockNumber, CapabilityId, Identity};

use crate::policy::GrantSet;

/// A ledger-recorded capability.
///
/// `creator` never changes. `owner` changes only through transfer, and
/// `content_pointer` goes from `None` to `Some` at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub owner: Identity,
    pub creator: Identity,
    pub content_pointer: Option<String>,
    pub created_at_block: BlockNumber,
}

impl Capability {
    /// A freshly created capability: owned by its creator, no content yet.
    pub fn new(id: CapabilityId, creator: Identity, block: BlockNumber) -> Self {
        Self {
            id,
            owner: creator,
            creator,
            content_pointer: None,
            created_at_block: block,
        }
    }

    pub fn grant_set(&self) -> GrantSet {
        GrantSet::for_capability(self)
    }
}

/// A write to the record set, applied when its block commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Insert(Capability),
    SetOwner { id: CapabilityId, owner: Identity },
    SetContentPointer { id: CapabilityId, pointer: String },
}

impl RecordChange {
    pub fn capability_id(&self) -> CapabilityId {
        match self {
            RecordChange::Insert(record) => record.id,
            RecordChange::SetOwner { id, .. } | RecordChange::SetContentPointer { id, .. } => *id,
        }
    }
}
