//! The decryption network interface.
//!
//! A network is a set of nodes that each hold an independent secret. For
//! encryption they hand out public keys bound to a predicate; for
//! decryption each node checks the caller's challenge and evaluates the
//! predicate against the live registry before releasing its key share.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capseal_auth::ChallengeStatement;
use capseal_core::{AccessPredicate, Blake3Hash};

use crate::crypto::{random_bytes, X25519PublicKey};
use crate::error::NetworkError;
use crate::keyshare::{KeyShare, NodeId};

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Random identifier of one encryption, chosen by the encrypter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(#[serde(with = "hex::serde")] pub [u8; 16]);

impl KeyId {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", hex::encode(self.0))
    }
}

/// A predicate and the encryption it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub predicate: AccessPredicate,
    pub key_id: KeyId,
}

impl KeyRequest {
    /// Context every share wrap for this request is bound to.
    pub fn share_context(&self, predicate_hash: &Blake3Hash, node: NodeId) -> Vec<u8> {
        let mut context = Vec::with_capacity(32 + 16 + 2);
        context.extend_from_slice(predicate_hash.as_bytes());
        context.extend_from_slice(self.key_id.as_bytes());
        context.extend_from_slice(&node.0.to_be_bytes());
        context
    }
}

/// A node's public key for one predicate and key ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKey {
    pub node: NodeId,
    pub public: X25519PublicKey,
}

/// Encryption-side key material: one public key per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub node_keys: Vec<NodeKey>,
}

/// Ask the nodes to re-wrap their shares to `recipient`.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub key: KeyRequest,
    /// Shares as stored in the bundle, wrapped to the nodes.
    pub shares: Vec<KeyShare>,
    /// One-shot public key of the requester.
    pub recipient: X25519PublicKey,
}

/// A decryption network.
#[async_trait]
pub trait DecryptionNetwork: Send + Sync {
    /// Predicate-bound public keys for sealing a new bundle.
    async fn derive_encryption_key(&self, request: &KeyRequest) -> Result<KeyMaterial>;

    /// Release every node's share to the requester, if the predicate holds
    /// for the identity the challenge proves.
    async fn release_decryption_key(
        &self,
        request: &ReleaseRequest,
        challenge: &ChallengeStatement,
    ) -> Result<Vec<KeyShare>>;
}

#[async_trait]
impl<N: DecryptionNetwork + ?Sized> DecryptionNetwork for std::sync::Arc<N> {
    async fn derive_encryption_key(&self, request: &KeyRequest) -> Result<KeyMaterial> {
        (**self).derive_encryption_key(request).await
    }

    async fn release_decryption_key(
        &self,
        request: &ReleaseRequest,
        challenge: &ChallengeStatement,
    ) -> Result<Vec<KeyShare>> {
        (**self).release_decryption_key(request, challenge).await
    }
}
