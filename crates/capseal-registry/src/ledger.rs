//! The ledger: a single-writer chain that runs the registry contract.
//!
//! Submissions are checked against current state, queued in a mempool and
//! executed when a block is sealed. With `auto_mine` every submission is
//! sealed into its own block straight away, like a development chain.
//! Finality is signalled per transaction through a one-shot channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use capseal_core::{
    BlockNumber, CapabilityId, ContractAddress, Identity, RegistryCoordinates, TxId,
};

use crate::error::{RegistryError, Result};
use crate::policy::CreationPolicy;
use crate::record::{Capability, RecordChange};
use crate::traits::{Registry, RegistryStore};
use crate::tx::{LedgerCall, LedgerEvent, PendingTx, RevertReason, TxReceipt, TxStatus};

/// Chain name used when none is configured.
pub const DEFAULT_CHAIN: &str = "capseal-devnet";

/// Deployment label of the registry contract.
pub const REGISTRY_LABEL: &str = "capseal-registry";

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Seal a block for every submission.
    pub auto_mine: bool,
    pub chain: String,
    pub contract: ContractAddress,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl LedgerConfig {
    /// Configuration for a registry deployed by `deployer`.
    pub fn deployed_by(deployer: &Identity) -> Self {
        Self {
            contract: ContractAddress::derive(deployer, REGISTRY_LABEL),
            ..Self::default()
        }
    }

    pub fn coordinates(&self) -> RegistryCoordinates {
        RegistryCoordinates::new(self.chain.clone(), self.contract)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            auto_mine: true,
            chain: DEFAULT_CHAIN.to_string(),
            contract: ContractAddress::derive(&Identity::from_bytes([0; 32]), REGISTRY_LABEL),
            event_capacity: 256,
        }
    }
}

struct QueuedTx {
    tx: TxId,
    caller: Identity,
    call: LedgerCall,
    reply: oneshot::Sender<TxReceipt>,
}

struct LedgerState {
    mempool: Vec<QueuedTx>,
    nonce: u64,
    height: BlockNumber,
    next_id: CapabilityId,
}

/// Record changes of the block being sealed. Later transactions in the
/// block read through it.
struct BlockDraft {
    next_id: CapabilityId,
    records: HashMap<CapabilityId, Capability>,
    changes: Vec<RecordChange>,
}

impl BlockDraft {
    fn new(next_id: CapabilityId) -> Self {
        Self {
            next_id,
            records: HashMap::new(),
            changes: Vec::new(),
        }
    }

    /// Queue `change` and remember `record` as its result.
    fn stage(&mut self, record: Capability, change: RecordChange) {
        self.records.insert(record.id, record);
        self.changes.push(change);
    }
}

/// A ledger running the registry contract over a record store.
pub struct Ledger<S: RegistryStore> {
    coordinates: RegistryCoordinates,
    store: S,
    policy: Box<dyn CreationPolicy>,
    auto_mine: AtomicBool,
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEvent>,
}

impl<S: RegistryStore> Ledger<S> {
    /// Open a ledger, resuming from whatever the store already holds.
    pub async fn open(
        store: S,
        policy: impl CreationPolicy + 'static,
        config: LedgerConfig,
    ) -> Result<Self> {
        let height = store.block_height().await?;
        let next_id = store
            .last_capability_id()
            .await?
            .map(|id| id.next())
            .unwrap_or(CapabilityId::FIRST);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        debug!(
            chain = %config.chain,
            contract = ?config.contract,
            height,
            next_id = %next_id,
            "ledger opened"
        );

        Ok(Self {
            coordinates: config.coordinates(),
            store,
            policy: Box::new(policy),
            auto_mine: AtomicBool::new(config.auto_mine),
            state: Mutex::new(LedgerState {
                mempool: Vec::new(),
                nonce: 0,
                height,
                next_id,
            }),
            events,
        })
    }

    /// The underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Switch automatic block sealing on or off.
    ///
    /// Turning it back on does not flush the mempool; call [`Ledger::mine`].
    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    pub fn is_auto_mine(&self) -> bool {
        self.auto_mine.load(Ordering::SeqCst)
    }

    /// Seal every pending transaction into one block.
    ///
    /// Returns the new block number, or `None` if the mempool was empty.
    pub async fn mine(&self) -> Result<Option<BlockNumber>> {
        let mut state = self.state.lock().await;
        self.seal_block(&mut state).await
    }

    /// Number of transactions waiting for a block.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.mempool.len()
    }

    /// Height of the last sealed block.
    pub async fn block_height(&self) -> BlockNumber {
        self.state.lock().await.height
    }

    /// Events emitted in a sealed block.
    pub async fn events_in_block(&self, number: BlockNumber) -> Result<Vec<LedgerEvent>> {
        self.store.events_in_block(number).await
    }

    async fn fetch(&self, id: CapabilityId) -> Result<Capability> {
        self.store
            .get_capability(id)
            .await?
            .ok_or(RegistryError::NotFound(id))
    }

    /// Latest view of a record, including changes staged in `draft`.
    async fn fetch_staged(&self, draft: &BlockDraft, id: CapabilityId) -> Result<Capability> {
        match draft.records.get(&id) {
            Some(record) => Ok(record.clone()),
            None => self.fetch(id).await,
        }
    }

    /// Contract rules shared by pre-flight and execution.
    async fn check(
        &self,
        draft: &BlockDraft,
        caller: &Identity,
        call: &LedgerCall,
    ) -> Result<Option<Capability>> {
        let unauthorized = || RegistryError::Unauthorized {
            caller: *caller,
            action: call.name(),
        };

        match call {
            LedgerCall::Create => {
                if !self.policy.may_create(caller) {
                    return Err(unauthorized());
                }
                Ok(None)
            }
            LedgerCall::SetContentPointer { id, .. } => {
                let record = self.fetch_staged(draft, *id).await?;
                if record.owner != *caller {
                    return Err(unauthorized());
                }
                if record.content_pointer.is_some() {
                    return Err(RegistryError::PointerAlreadySet(*id));
                }
                Ok(Some(record))
            }
            LedgerCall::Transfer { id, .. } => {
                let record = self.fetch_staged(draft, *id).await?;
                if record.owner != *caller {
                    return Err(unauthorized());
                }
                Ok(Some(record))
            }
        }
    }

    /// Execute one call against the draft. Nothing reaches the store here.
    async fn apply(
        &self,
        draft: &mut BlockDraft,
        block: BlockNumber,
        caller: &Identity,
        call: &LedgerCall,
    ) -> Result<Vec<LedgerEvent>> {
        let record = self.check(draft, caller, call).await?;

        match (call, record) {
            (LedgerCall::Create, _) => {
                let id = draft.next_id;
                draft.next_id = id.next();
                let record = Capability::new(id, *caller, block);
                draft.stage(record.clone(), RecordChange::Insert(record));
                Ok(vec![LedgerEvent::CapabilityCreated {
                    id,
                    creator: *caller,
                }])
            }
            (LedgerCall::SetContentPointer { id, pointer }, Some(mut record)) => {
                record.content_pointer = Some(pointer.clone());
                let change = RecordChange::SetContentPointer {
                    id: *id,
                    pointer: pointer.clone(),
                };
                draft.stage(record, change);
                Ok(vec![LedgerEvent::ContentPointerSet { id: *id }])
            }
            (LedgerCall::Transfer { id, to }, Some(mut record)) => {
                let from = std::mem::replace(&mut record.owner, *to);
                draft.stage(record, RecordChange::SetOwner { id: *id, owner: *to });
                Ok(vec![LedgerEvent::OwnershipTransferred {
                    id: *id,
                    from,
                    to: *to,
                }])
            }
            (call, None) => Err(RegistryError::InvalidData(format!(
                "{} passed checks without a record",
                call.name()
            ))),
        }
    }

    /// Execute the mempool and commit the result as one block.
    ///
    /// If the store refuses the commit, state and mempool are left as they
    /// were and the queued transactions stay pending.
    async fn seal_block(&self, state: &mut LedgerState) -> Result<Option<BlockNumber>> {
        if state.mempool.is_empty() {
            return Ok(None);
        }

        let number = state.height + 1;
        let mut draft = BlockDraft::new(state.next_id);
        let mut block_events = Vec::new();
        let mut outcomes = Vec::with_capacity(state.mempool.len());

        for entry in &state.mempool {
            let (status, events) = match self
                .apply(&mut draft, number, &entry.caller, &entry.call)
                .await
            {
                Ok(events) => (TxStatus::Success, events),
                Err(err) => {
                    warn!(tx = %entry.tx, call = entry.call.name(), error = %err, "transaction reverted");
                    (TxStatus::Reverted(RevertReason::from_error(&err)), Vec::new())
                }
            };
            block_events.extend(events.iter().cloned());
            outcomes.push((status, events));
        }

        if let Err(err) = self
            .store
            .commit_block(number, &draft.changes, &block_events)
            .await
        {
            error!(block = number, error = %err, "failed to commit sealed block");
            return Err(err);
        }
        state.height = number;
        state.next_id = draft.next_id;
        let queued = std::mem::take(&mut state.mempool);
        debug!(block = number, txs = queued.len(), events = block_events.len(), "block sealed");

        for (entry, (status, events)) in queued.into_iter().zip(outcomes) {
            // The submitter may have stopped waiting.
            let _ = entry.reply.send(TxReceipt {
                tx: entry.tx,
                block: number,
                status,
                events,
            });
        }
        for event in block_events {
            match &event {
                LedgerEvent::CapabilityCreated { id, creator } => {
                    info!(id = %id, creator = ?creator, block = number, "capability created");
                }
                LedgerEvent::OwnershipTransferred { id, from, to } => {
                    info!(id = %id, from = ?from, to = ?to, block = number, "ownership transferred");
                }
                LedgerEvent::ContentPointerSet { .. } => {}
            }
            let _ = self.events.send(event);
        }

        Ok(Some(number))
    }
}

#[async_trait]
impl<S: RegistryStore> Registry for Ledger<S> {
    fn coordinates(&self) -> &RegistryCoordinates {
        &self.coordinates
    }

    async fn submit(&self, caller: &Identity, call: LedgerCall) -> Result<PendingTx> {
        let mut state = self.state.lock().await;

        let preflight = BlockDraft::new(state.next_id);
        if let Err(err) = self.check(&preflight, caller, &call).await {
            debug!(call = call.name(), caller = ?caller, error = %err, "submission rejected");
            return Err(err);
        }

        let tx = call.tx_id(caller, state.nonce)?;
        state.nonce += 1;

        let (reply, receipt) = oneshot::channel();
        debug!(tx = %tx, call = call.name(), caller = ?caller, "transaction submitted");
        state.mempool.push(QueuedTx {
            tx,
            caller: *caller,
            call,
            reply,
        });

        if self.is_auto_mine() {
            if let Err(err) = self.seal_block(&mut state).await {
                // The caller sees the error; don't leave the call queued behind it.
                state.mempool.retain(|queued| queued.tx != tx);
                return Err(err);
            }
        }

        Ok(PendingTx::new(tx, receipt))
    }

    async fn evaluate(&self, id: CapabilityId, identity: &Identity) -> Result<bool> {
        Ok(self.fetch(id).await?.grant_set().contains(identity))
    }

    async fn owner_of(&self, id: CapabilityId) -> Result<Identity> {
        Ok(self.fetch(id).await?.owner)
    }

    async fn creator_of(&self, id: CapabilityId) -> Result<Identity> {
        Ok(self.fetch(id).await?.creator)
    }

    async fn content_pointer(&self, id: CapabilityId) -> Result<Option<String>> {
        Ok(self.fetch(id).await?.content_pointer)
    }

    async fn record_for(&self, id: CapabilityId, caller: &Identity) -> Result<Capability> {
        let record = self.fetch(id).await?;
        if !record.grant_set().contains(caller) {
            return Err(RegistryError::AccessDenied {
                id,
                caller: *caller,
            });
        }
        Ok(record)
    }

    fn events(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}
