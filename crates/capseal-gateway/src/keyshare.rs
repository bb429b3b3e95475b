//! Key shares: pieces of a content key, each wrapped for one holder.
//!
//! The content key is split n-of-n by XOR. Each share is wrapped to a
//! node's predicate-bound X25519 key when sealing, and re-wrapped by the
//! node to the requester's one-shot key when access is granted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{random_bytes, EncryptionKey, EncryptionNonce, X25519PublicKey, X25519StaticSecret};
use crate::error::{GatewayError, Result};

/// Index of a node in the decryption network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// One share of a content key, encrypted to a single recipient key.
///
/// The wrap is ECDH with a fresh ephemeral key, then ChaCha20-Poly1305
/// under a key bound to `context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShare {
    pub node: NodeId,
    pub ephemeral_public: X25519PublicKey,
    pub nonce: EncryptionNonce,
    #[serde(with = "hex::serde")]
    pub encrypted_share: Vec<u8>,
}

impl KeyShare {
    /// Wrap `share` so only the holder of `recipient`'s secret can open it.
    pub fn wrap(
        node: NodeId,
        share: &[u8; 32],
        recipient: &X25519PublicKey,
        context: &[u8],
    ) -> Result<Self> {
        let ephemeral = X25519StaticSecret::generate();
        let wrap_key = ephemeral.diffie_hellman(recipient).derive_wrap_key(context);

        let nonce = EncryptionNonce::generate();
        let encrypted_share = wrap_key.encrypt(share, &node.0.to_be_bytes(), &nonce)?;

        Ok(Self {
            node,
            ephemeral_public: ephemeral.public_key(),
            nonce,
            encrypted_share,
        })
    }

    /// Open the share with the recipient's secret.
    pub fn unwrap_with(&self, secret: &X25519StaticSecret, context: &[u8]) -> Result<[u8; 32]> {
        let wrap_key = secret
            .diffie_hellman(&self.ephemeral_public)
            .derive_wrap_key(context);

        let bytes = wrap_key.decrypt(&self.encrypted_share, &self.node.0.to_be_bytes(), &self.nonce)?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            GatewayError::BundleCorrupt(format!(
                "invalid share length: expected 32, got {}",
                b.len()
            ))
        })
    }
}

/// Split `key` into `n` shares that XOR back to it. All are needed.
pub fn split_key(key: &EncryptionKey, n: usize) -> Vec<[u8; 32]> {
    if n == 0 {
        return Vec::new();
    }

    let mut shares: Vec<[u8; 32]> = (1..n).map(|_| random_bytes()).collect();
    let mut last = *key.as_bytes();
    for share in &shares {
        xor_into(&mut last, share);
    }
    shares.push(last);
    shares
}

/// Recombine shares produced by [`split_key`].
pub fn combine_shares<'a>(shares: impl IntoIterator<Item = &'a [u8; 32]>) -> EncryptionKey {
    let mut key = [0u8; 32];
    for share in shares {
        xor_into(&mut key, share);
    }
    EncryptionKey::from_bytes(key)
}

fn xor_into(acc: &mut [u8; 32], share: &[u8; 32]) {
    for (a, s) in acc.iter_mut().zip(share.iter()) {
        *a ^= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_roundtrip() {
        let recipient = X25519StaticSecret::generate();
        let share = [0x42; 32];

        let wrapped = KeyShare::wrap(NodeId(1), &share, &recipient.public_key(), b"ctx").unwrap();
        assert_eq!(wrapped.unwrap_with(&recipient, b"ctx").unwrap(), share);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = X25519StaticSecret::generate();
        let wrapped =
            KeyShare::wrap(NodeId(1), &[7; 32], &recipient.public_key(), b"ctx").unwrap();

        assert!(wrapped
            .unwrap_with(&X25519StaticSecret::generate(), b"ctx")
            .is_err());
    }

    #[test]
    fn test_wrong_context_fails() {
        let recipient = X25519StaticSecret::generate();
        let wrapped =
            KeyShare::wrap(NodeId(1), &[7; 32], &recipient.public_key(), b"ctx-a").unwrap();

        assert!(wrapped.unwrap_with(&recipient, b"ctx-b").is_err());
    }

    #[test]
    fn test_relabelled_node_fails() {
        let recipient = X25519StaticSecret::generate();
        let mut wrapped =
            KeyShare::wrap(NodeId(1), &[7; 32], &recipient.public_key(), b"ctx").unwrap();
        wrapped.node = NodeId(2);

        assert!(wrapped.unwrap_with(&recipient, b"ctx").is_err());
    }

    #[test]
    fn test_missing_share_gives_wrong_key() {
        let key = EncryptionKey::generate();
        let shares = split_key(&key, 3);
        assert_ne!(combine_shares(&shares[..2]), key);
    }

    proptest! {
        #[test]
        fn split_then_combine(seed in any::<[u8; 32]>(), n in 1usize..8) {
            let key = EncryptionKey::from_bytes(seed);
            let shares = split_key(&key, n);
            prop_assert_eq!(shares.len(), n);
            prop_assert_eq!(combine_shares(&shares), key);
        }
    }
}
