//! # capseal gateway
//!
//! Condition-gated encryption. Plaintext is sealed under an access
//! predicate; the decryption network releases the key only to a caller
//! whose signed challenge satisfies that predicate against the live
//! registry.
//!
//! ## Key Types
//!
//! - [`EncryptionGateway`] - Encrypt/decrypt with timeouts and bounded retries
//! - [`CiphertextBundle`] - Self-describing, integrity-tagged ciphertext
//! - [`DecryptionNetwork`] - The network interface
//! - [`MemoryNetwork`] - In-process N-node network over a [`capseal_registry::Registry`]
//!
//! ## Encryption Model
//!
//! 1. **Content Key**: a random ChaCha20-Poly1305 key encrypts the payload,
//!    with the predicate hash as associated data
//! 2. **Key Shares**: the content key is split n-of-n and each share is
//!    wrapped to a node key derived for this predicate and key ID
//! 3. **Release**: each node checks the challenge and the predicate, then
//!    re-wraps its share to a one-shot key held by the requester
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capseal_auth::ChallengeStatement;
//! use capseal_core::AccessPredicate;
//! use capseal_gateway::{DecryptionNetwork, EncryptionGateway};
//!
//! async fn example<N: DecryptionNetwork>(
//!     gateway: &EncryptionGateway<N>,
//!     predicate: &AccessPredicate,
//!     challenge: &ChallengeStatement,
//! ) -> capseal_gateway::Result<()> {
//!     let bundle = gateway.encrypt_under_predicate(b"secret", predicate).await?;
//!     let plaintext = gateway.decrypt_under_predicate(&bundle, challenge).await?;
//!     assert_eq!(&plaintext[..], b"secret");
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod keyshare;
pub mod memory;
pub mod network;

pub use bundle::{CiphertextBundle, BUNDLE_VERSION};
pub use crypto::{EncryptionKey, EncryptionNonce, SharedKey, X25519PublicKey, X25519StaticSecret};
pub use error::{GatewayError, NetworkError, Result};
pub use gateway::{EncryptionGateway, GatewayConfig, RetryPolicy};
pub use keyshare::{combine_shares, split_key, KeyShare, NodeId};
pub use memory::{MemoryNetwork, NetworkConfig, DEFAULT_NODES, MAX_NODES};
pub use network::{DecryptionNetwork, KeyId, KeyMaterial, KeyRequest, NodeKey, ReleaseRequest};
