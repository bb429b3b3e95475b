//! # capseal core
//!
//! Pure primitives shared by every capseal crate: identities and signatures,
//! capability IDs, canonical encoding, and access predicates.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Identity`] - A party's Ed25519 verifying key
//! - [`CapabilityId`] - Registry-allocated capability identifier
//! - [`AccessPredicate`] - "capability X, evaluated against caller Y, must report true"
//! - [`ConditionBuilder`] - Turns a capability ID into its predicate
//!
//! ## Canonicalization
//!
//! Predicates are hashed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod condition;
pub mod crypto;
pub mod error;
pub mod types;

pub use canonical::canonical_encode;
pub use condition::{
    AccessPredicate, ConditionBuilder, ContractAddress, FunctionSignature, PredicateParam,
    RegistryCoordinates, ResolvedCall, ReturnValueTest, CALLER_PLACEHOLDER,
};
pub use crypto::{Blake3Hash, Identity, Keypair, Signature};
pub use error::{CoreError, Result};
pub use types::{now_millis, BlockNumber, CapabilityId, Clock, ManualClock, SystemClock, TxId};
