//! Ciphertext bundles.
//!
//! A bundle carries everything needed to decrypt once the network agrees:
//! the predicate, the AEAD ciphertext, and the content key's shares wrapped
//! to the nodes. The predicate hash is the AEAD associated data and part of
//! every share wrap, so a bundle with a swapped predicate cannot decrypt.

use serde::{Deserialize, Serialize};

use capseal_core::AccessPredicate;

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::{GatewayError, Result};
use crate::keyshare::{split_key, KeyShare};
use crate::network::{KeyId, KeyMaterial, KeyRequest};

/// Bundle format version.
pub const BUNDLE_VERSION: u8 = 1;

const INTEGRITY_CONTEXT: &str = "capseal-bundle-v0-integrity";

/// An encrypted payload bound to an access predicate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiphertextBundle {
    pub version: u8,
    pub key_id: KeyId,
    pub nonce: EncryptionNonce,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    pub shares: Vec<KeyShare>,
    #[serde(with = "hex::serde")]
    pub integrity_tag: [u8; 32],
    pub predicate: AccessPredicate,
}

impl CiphertextBundle {
    /// Encrypt `plaintext` and wrap a share of its key to every node key.
    pub(crate) fn seal(
        plaintext: &[u8],
        request: &KeyRequest,
        material: &KeyMaterial,
    ) -> Result<Self> {
        if material.node_keys.is_empty() {
            return Err(GatewayError::NetworkUnavailable(
                "network returned no node keys".into(),
            ));
        }

        let predicate_hash = request.predicate.hash()?;
        let content_key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();
        let ciphertext = content_key.encrypt(plaintext, predicate_hash.as_bytes(), &nonce)?;

        let shares = split_key(&content_key, material.node_keys.len())
            .iter()
            .zip(&material.node_keys)
            .map(|(share, node_key)| {
                let context = request.share_context(&predicate_hash, node_key.node);
                KeyShare::wrap(node_key.node, share, &node_key.public, &context)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut bundle = Self {
            version: BUNDLE_VERSION,
            key_id: request.key_id,
            nonce,
            ciphertext,
            shares,
            integrity_tag: [0; 32],
            predicate: request.predicate.clone(),
        };
        bundle.integrity_tag = bundle.compute_tag()?;
        Ok(bundle)
    }

    /// The key request this bundle was sealed under.
    pub fn key_request(&self) -> KeyRequest {
        KeyRequest {
            predicate: self.predicate.clone(),
            key_id: self.key_id,
        }
    }

    /// Integrity tag over predicate, key ID, nonce, ciphertext and shares.
    pub fn compute_tag(&self) -> Result<[u8; 32]> {
        let mut material = self.predicate.canonical_bytes()?;
        material.push(self.version);
        material.extend_from_slice(self.key_id.as_bytes());
        material.extend_from_slice(self.nonce.as_bytes());
        material.extend_from_slice(&(self.ciphertext.len() as u64).to_be_bytes());
        material.extend_from_slice(&self.ciphertext);
        for share in &self.shares {
            material.extend_from_slice(&share.node.0.to_be_bytes());
            material.extend_from_slice(share.ephemeral_public.as_bytes());
            material.extend_from_slice(share.nonce.as_bytes());
            material.extend_from_slice(&(share.encrypted_share.len() as u64).to_be_bytes());
            material.extend_from_slice(&share.encrypted_share);
        }
        Ok(blake3::derive_key(INTEGRITY_CONTEXT, &material))
    }

    /// Check version and integrity tag before anything is sent anywhere.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.version != BUNDLE_VERSION {
            return Err(GatewayError::BundleCorrupt(format!(
                "unsupported bundle version {}",
                self.version
            )));
        }
        let expected = self.compute_tag()?;
        // blake3::Hash compares in constant time.
        if blake3::Hash::from(expected) != blake3::Hash::from(self.integrity_tag) {
            return Err(GatewayError::BundleCorrupt("integrity tag mismatch".into()));
        }
        Ok(())
    }

    /// Decrypt with the recombined content key.
    pub(crate) fn open(&self, key: &EncryptionKey) -> Result<Vec<u8>> {
        let predicate_hash = self.predicate.hash()?;
        key.decrypt(&self.ciphertext, predicate_hash.as_bytes(), &self.nonce)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    /// Parse a bundle. Unparseable input is corruption, not a user error.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| GatewayError::BundleCorrupt(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GatewayError::BundleCorrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::X25519StaticSecret;
    use crate::keyshare::{combine_shares, NodeId};
    use crate::network::NodeKey;
    use capseal_core::{CapabilityId, ConditionBuilder, ContractAddress, RegistryCoordinates};

    fn request(id: u64) -> KeyRequest {
        let builder = ConditionBuilder::new(RegistryCoordinates::new(
            "capseal-devnet",
            ContractAddress::from_bytes([5; 32]),
        ));
        KeyRequest {
            predicate: builder.build(CapabilityId::new(id)),
            key_id: KeyId::generate(),
        }
    }

    fn nodes(n: u16) -> Vec<X25519StaticSecret> {
        (0..n).map(|_| X25519StaticSecret::generate()).collect()
    }

    fn material(secrets: &[X25519StaticSecret]) -> KeyMaterial {
        KeyMaterial {
            node_keys: secrets
                .iter()
                .enumerate()
                .map(|(i, s)| NodeKey {
                    node: NodeId(i as u16),
                    public: s.public_key(),
                })
                .collect(),
        }
    }

    fn recover_key(bundle: &CiphertextBundle, secrets: &[X25519StaticSecret]) -> EncryptionKey {
        let request = bundle.key_request();
        let hash = bundle.predicate.hash().unwrap();
        let shares: Vec<[u8; 32]> = bundle
            .shares
            .iter()
            .zip(secrets)
            .map(|(share, secret)| {
                share
                    .unwrap_with(secret, &request.share_context(&hash, share.node))
                    .unwrap()
            })
            .collect();
        combine_shares(&shares)
    }

    #[test]
    fn test_seal_and_open() {
        let secrets = nodes(3);
        let request = request(1);
        let bundle = CiphertextBundle::seal(b"the secret", &request, &material(&secrets)).unwrap();

        bundle.verify_integrity().unwrap();
        assert_eq!(bundle.shares.len(), 3);

        let key = recover_key(&bundle, &secrets);
        assert_eq!(bundle.open(&key).unwrap(), b"the secret");
    }

    #[test]
    fn test_tampered_ciphertext_detected() {
        let secrets = nodes(2);
        let mut bundle =
            CiphertextBundle::seal(b"the secret", &request(1), &material(&secrets)).unwrap();
        bundle.ciphertext[0] ^= 0x01;

        assert!(matches!(
            bundle.verify_integrity(),
            Err(GatewayError::BundleCorrupt(_))
        ));
    }

    #[test]
    fn test_swapped_predicate_detected() {
        let secrets = nodes(2);
        let mut bundle =
            CiphertextBundle::seal(b"the secret", &request(1), &material(&secrets)).unwrap();
        let key = recover_key(&bundle, &secrets);

        bundle.predicate = request(2).predicate;
        assert!(bundle.verify_integrity().is_err());

        // Even with a recomputed tag the AEAD refuses the new predicate.
        bundle.integrity_tag = bundle.compute_tag().unwrap();
        assert!(matches!(
            bundle.open(&key),
            Err(GatewayError::BundleCorrupt(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let secrets = nodes(1);
        let bundle = CiphertextBundle::seal(b"x", &request(9), &material(&secrets)).unwrap();
        let json = bundle.to_json().unwrap();
        assert!(json.contains("\"integrityTag\""));
        assert_eq!(CiphertextBundle::from_json(&json).unwrap(), bundle);
    }

    #[test]
    fn test_garbage_json_is_corrupt() {
        assert!(matches!(
            CiphertextBundle::from_json("{\"version\":1}"),
            Err(GatewayError::BundleCorrupt(_))
        ));
    }

    #[test]
    fn test_no_node_keys() {
        let result = CiphertextBundle::seal(b"x", &request(1), &KeyMaterial { node_keys: vec![] });
        assert!(matches!(result, Err(GatewayError::NetworkUnavailable(_))));
    }
}
