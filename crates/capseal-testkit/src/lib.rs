//! # capseal testkit
//!
//! Testing utilities for capseal.
//!
//! ## Overview
//!
//! - **Fixtures**: alice, bob and carol from fixed seeds, special-purpose
//!   signers, and a vault wired over the memory ledger and network
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use capseal_testkit::TestFixture;
//!
//! async fn example() {
//!     let f = TestFixture::new().await.unwrap();
//!     let sealed = f.vault.seal(&f.alice, b"secret").await.unwrap();
//!     f.vault.reveal(&f.alice, sealed.capability_id).await.unwrap();
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use capseal_testkit::generators::{identity, predicate};
//!
//! proptest! {
//!     #[test]
//!     fn predicate_hash_is_stable(p in predicate()) {
//!         prop_assert_eq!(p.hash().unwrap(), p.clone().hash().unwrap());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    alice, bob, carol, test_audience, DecliningSigner, FixtureBuilder, TestFixture, TestLedger,
    TestNetwork, TestVault, WatchOnlySigner,
};
