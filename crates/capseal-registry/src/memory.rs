//! In-memory implementation of the RegistryStore trait.
//!
//! This is primarily for tests and development chains. It has the same
//! semantics as SQLite but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use capseal_core::{BlockNumber, CapabilityId};

use crate::error::{RegistryError, Result};
use crate::record::{Capability, RecordChange};
use crate::traits::RegistryStore;
use crate::tx::LedgerEvent;

/// In-memory registry store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryRegistryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records indexed by ID; ordered so the last key is the highest ID.
    capabilities: BTreeMap<CapabilityId, Capability>,

    /// Events per sealed block.
    blocks: HashMap<BlockNumber, Vec<LedgerEvent>>,

    height: BlockNumber,
}

impl MemoryRegistryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| RegistryError::InvalidData(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| RegistryError::InvalidData(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn get_capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        Ok(self.read()?.capabilities.get(&id).cloned())
    }

    async fn last_capability_id(&self) -> Result<Option<CapabilityId>> {
        Ok(self.read()?.capabilities.keys().next_back().copied())
    }

    async fn commit_block(
        &self,
        number: BlockNumber,
        changes: &[RecordChange],
        events: &[LedgerEvent],
    ) -> Result<()> {
        let mut inner = self.write()?;
        if number != inner.height + 1 {
            return Err(RegistryError::InvalidData(format!(
                "block {} does not follow height {}",
                number, inner.height
            )));
        }

        // Stage against a copy of the touched records; nothing lands until
        // every change applies.
        let mut staged: BTreeMap<CapabilityId, Capability> = BTreeMap::new();
        for change in changes {
            let id = change.capability_id();
            let current = match staged.get(&id) {
                Some(record) => Some(record.clone()),
                None => inner.capabilities.get(&id).cloned(),
            };
            let updated = match (change, current) {
                (RecordChange::Insert(record), None) => record.clone(),
                (RecordChange::Insert(_), Some(_)) => {
                    return Err(RegistryError::InvalidData(format!(
                        "capability {id} already exists"
                    )))
                }
                (RecordChange::SetOwner { owner, .. }, Some(mut record)) => {
                    record.owner = *owner;
                    record
                }
                (RecordChange::SetContentPointer { pointer, .. }, Some(mut record)) => {
                    record.content_pointer = Some(pointer.clone());
                    record
                }
                (_, None) => return Err(RegistryError::NotFound(id)),
            };
            staged.insert(id, updated);
        }

        inner.capabilities.extend(staged);
        inner.blocks.insert(number, events.to_vec());
        inner.height = number;
        Ok(())
    }

    async fn block_height(&self) -> Result<BlockNumber> {
        Ok(self.read()?.height)
    }

    async fn events_in_block(&self, number: BlockNumber) -> Result<Vec<LedgerEvent>> {
        Ok(self
            .read()?
            .blocks
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }
}
