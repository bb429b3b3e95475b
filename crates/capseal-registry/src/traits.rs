//! Registry traits: the contract interface and the record store beneath it.
//!
//! [`Registry`] is what the rest of capseal talks to. [`RegistryStore`]
//! keeps the registry storage-agnostic; implementations include SQLite
//! (persistent) and in-memory (for tests).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use capseal_core::{BlockNumber, CapabilityId, Identity, RegistryCoordinates};

use crate::error::Result;
use crate::record::{Capability, RecordChange};
use crate::tx::{LedgerCall, LedgerEvent, PendingTx, TxReceipt};

/// Async persistence for capability records and sealed blocks.
///
/// Only the ledger writes; stores do not enforce contract rules.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Capability Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a record by ID.
    async fn get_capability(&self, id: CapabilityId) -> Result<Option<Capability>>;

    /// The highest ID ever allocated, if any.
    async fn last_capability_id(&self) -> Result<Option<CapabilityId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Blocks
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal block `number`: apply its record changes and record its events.
    ///
    /// All or nothing. On error no change is visible and the height stays
    /// where it was. Inserting a taken ID or updating a missing one fails.
    async fn commit_block(
        &self,
        number: BlockNumber,
        changes: &[RecordChange],
        events: &[LedgerEvent],
    ) -> Result<()>;

    /// Height of the last sealed block (0 if none).
    async fn block_height(&self) -> Result<BlockNumber>;

    /// Events emitted in a given block, in execution order.
    async fn events_in_block(&self, number: BlockNumber) -> Result<Vec<LedgerEvent>>;
}

/// The registry contract as seen by its callers.
///
/// Writes go through [`Registry::submit`] and become effective only once
/// sealed; reads always reflect the latest sealed state.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Chain and contract address of this registry.
    fn coordinates(&self) -> &RegistryCoordinates;

    /// Submit a write. Calls that would revert are rejected up front.
    async fn submit(&self, caller: &Identity, call: LedgerCall) -> Result<PendingTx>;

    /// Whether `identity` is in the capability's grant set.
    async fn evaluate(&self, id: CapabilityId, identity: &Identity) -> Result<bool>;

    async fn owner_of(&self, id: CapabilityId) -> Result<Identity>;

    async fn creator_of(&self, id: CapabilityId) -> Result<Identity>;

    /// Public read of the content pointer.
    async fn content_pointer(&self, id: CapabilityId) -> Result<Option<String>>;

    /// Full record, readable only by identities the capability grants.
    async fn record_for(&self, id: CapabilityId, caller: &Identity) -> Result<Capability>;

    /// Subscribe to events of every sealed block.
    fn events(&self) -> broadcast::Receiver<LedgerEvent>;
}

/// Submit-and-wait helpers over [`Registry`].
pub trait RegistryExt: Registry {
    /// Submit `call` and wait for a successful receipt.
    fn execute(
        &self,
        caller: &Identity,
        call: LedgerCall,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<TxReceipt>> + Send;

    /// Create a capability and return its ID.
    fn create(
        &self,
        creator: &Identity,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<CapabilityId>> + Send;
}

impl<R: Registry + ?Sized> RegistryExt for R {
    async fn execute(
        &self,
        caller: &Identity,
        call: LedgerCall,
        timeout: Duration,
    ) -> Result<TxReceipt> {
        let pending = self.submit(caller, call).await?;
        pending.wait(timeout).await?.into_success()
    }

    async fn create(&self, creator: &Identity, timeout: Duration) -> Result<CapabilityId> {
        let receipt = self.execute(creator, LedgerCall::Create, timeout).await?;
        receipt.created_capability().ok_or_else(|| {
            crate::error::RegistryError::InvalidData(format!(
                "create receipt {} carries no creation event",
                receipt.tx
            ))
        })
    }
}
