//! Content pointers: how a sealed secret is stored on the ledger.
//!
//! A pointer is a data URI. Until sealing completes it is unset or the
//! pending placeholder; afterwards it is base64 JSON metadata carrying the
//! ciphertext bundle.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use capseal_core::CapabilityId;
use capseal_gateway::CiphertextBundle;

use crate::error::{Result, VaultError};

/// Placeholder for a capability whose secret is not sealed yet.
pub const PENDING_POINTER: &str = "data:,encrypted_pending";

const POPULATED_PREFIX: &str = "data:application/json;base64,";

const DESCRIPTION: &str = "Only the owner or creator of this capability can decrypt it.";

/// A parsed content pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPointer {
    Pending,
    Populated(CiphertextBundle),
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretMetadata {
    name: String,
    description: String,
    properties: SecretProperties,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretProperties {
    encrypted: CiphertextBundle,
}

impl ContentPointer {
    /// Parse the pointer stored for `id`. Anything unrecognized is corrupt.
    pub fn parse(id: CapabilityId, raw: Option<&str>) -> Result<Self> {
        let raw = match raw {
            None => return Ok(ContentPointer::Pending),
            Some(raw) if raw.is_empty() || raw == PENDING_POINTER => {
                return Ok(ContentPointer::Pending)
            }
            Some(raw) => raw,
        };

        let invalid = |reason: String| VaultError::InvalidPointer { id, reason };

        let encoded = raw
            .strip_prefix(POPULATED_PREFIX)
            .ok_or_else(|| invalid("unrecognized pointer format".into()))?;
        let json = STANDARD
            .decode(encoded)
            .map_err(|e| invalid(format!("bad base64: {e}")))?;
        let metadata: SecretMetadata =
            serde_json::from_slice(&json).map_err(|e| invalid(format!("bad metadata: {e}")))?;

        Ok(ContentPointer::Populated(metadata.properties.encrypted))
    }

    /// Render the populated pointer for `bundle`.
    pub fn encode(id: CapabilityId, bundle: &CiphertextBundle) -> Result<String> {
        let metadata = SecretMetadata {
            name: format!("Secret #{id}"),
            description: DESCRIPTION.into(),
            properties: SecretProperties {
                encrypted: bundle.clone(),
            },
        };
        let json = serde_json::to_vec(&metadata).map_err(|e| VaultError::InvalidPointer {
            id,
            reason: e.to_string(),
        })?;
        Ok(format!("{POPULATED_PREFIX}{}", STANDARD.encode(json)))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ContentPointer::Pending)
    }
}
