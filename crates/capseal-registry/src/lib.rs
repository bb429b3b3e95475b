//! # capseal registry
//!
//! The capability registry: who owns and who created each capability, and
//! whether a given identity may read it. Records live on an append-only
//! ledger; writes become effective when their block is sealed.
//!
//! ## Key Types
//!
//! - [`Registry`] - The async contract interface (submit, evaluate, reads)
//! - [`Ledger`] - Mempool, block sealing and finality over a [`RegistryStore`]
//! - [`SqliteRegistryStore`] - SQLite-based persistent records
//! - [`MemoryRegistryStore`] - In-memory records for tests
//! - [`CreationPolicy`] - Who may create capabilities ([`Allowlist`], [`Open`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use capseal_core::Keypair;
//! use capseal_registry::{Allowlist, Ledger, LedgerConfig, MemoryRegistryStore, Registry, RegistryExt};
//!
//! async fn example() -> capseal_registry::Result<()> {
//!     let deployer = Keypair::generate().identity();
//!     let ledger = Ledger::open(
//!         MemoryRegistryStore::new(),
//!         Allowlist::single(deployer),
//!         LedgerConfig::deployed_by(&deployer),
//!     )
//!     .await?;
//!
//!     let id = ledger.create(&deployer, Duration::from_secs(30)).await?;
//!     assert!(ledger.evaluate(id, &deployer).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Pre-flight**: calls that would revert are rejected before queuing
//! - **Finality**: each submission resolves a one-shot receipt when sealed
//! - **No default-allow**: unknown IDs fail `NotFound` on every read

pub mod error;
pub mod ledger;
pub mod memory;
pub mod migration;
pub mod policy;
pub mod record;
pub mod sqlite;
pub mod traits;
pub mod tx;

pub use error::{RegistryError, Result};
pub use ledger::{Ledger, LedgerConfig, DEFAULT_CHAIN};
pub use memory::MemoryRegistryStore;
pub use policy::{Allowlist, CreationPolicy, GrantSet, Open};
pub use record::{Capability, RecordChange};
pub use sqlite::SqliteRegistryStore;
pub use traits::{Registry, RegistryExt, RegistryStore};
pub use tx::{LedgerCall, LedgerEvent, PendingTx, RevertReason, TxReceipt, TxStatus};
