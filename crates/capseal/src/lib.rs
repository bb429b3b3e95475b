//! # capseal
//!
//! Condition-gated secret distribution. A secret is sealed to a capability
//! recorded on a ledger; only an identity the capability grants (its owner
//! or its creator) can get the decryption key from the network, and it
//! proves who it is with a signed challenge.
//!
//! ## Overview
//!
//! - **Registry**: capabilities with an owner and a creator, on an
//!   append-only ledger ([`registry`])
//! - **Conditions**: a predicate naming the registry check to run
//!   ([`core::ConditionBuilder`])
//! - **Challenges**: short-lived signed statements of identity ([`auth`])
//! - **Gateway**: encryption whose key the network releases only when the
//!   predicate holds ([`gateway`])
//! - **Vault**: the lifecycle tying them together ([`Vault`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capseal::{Revealed, Vault, VaultConfig};
//! use capseal::auth::Audience;
//! use capseal::core::Keypair;
//! use capseal::gateway::{MemoryNetwork, NetworkConfig};
//! use capseal::registry::{Allowlist, Ledger, LedgerConfig, MemoryRegistryStore};
//!
//! async fn example() -> capseal::Result<()> {
//!     let alice = Keypair::generate();
//!     let ledger_config = LedgerConfig::deployed_by(&alice.identity());
//!     let coordinates = ledger_config.coordinates();
//!     let ledger = Arc::new(
//!         Ledger::open(MemoryRegistryStore::new(), Allowlist::single(alice.identity()), ledger_config)
//!             .await?,
//!     );
//!
//!     let audience = Audience::new("capseal.local", "https://capseal.local");
//!     let network = MemoryNetwork::new(ledger.clone(), NetworkConfig::new(coordinates.clone(), audience.clone()))?;
//!     let vault = Vault::new(ledger, network, VaultConfig::new(audience, coordinates));
//!
//!     let sealed = vault.seal(&alice, b"the secret").await?;
//!     match vault.reveal(&alice, sealed.capability_id).await? {
//!         Revealed::Secret(bytes) => assert_eq!(&bytes[..], b"the secret"),
//!         Revealed::Pending => unreachable!(),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `capseal::core` - Identities, capability IDs, predicates
//! - `capseal::registry` - The capability registry and ledger
//! - `capseal::auth` - Signers and challenges
//! - `capseal::gateway` - Bundles and the decryption network

pub mod config;
pub mod error;
pub mod pointer;
pub mod vault;

// Re-export component crates
pub use capseal_auth as auth;
pub use capseal_core as core;
pub use capseal_gateway as gateway;
pub use capseal_registry as registry;

pub use config::VaultConfig;
pub use error::{ErrorKind, Result, VaultError};
pub use pointer::{ContentPointer, PENDING_POINTER};
pub use vault::{Revealed, SealedSecret, SecretState, Vault};

pub use capseal_core::{CapabilityId, Identity, Keypair};
