//! The Vault: lifecycle of condition-gated secrets.
//!
//! Sealing creates a capability, waits for it to be final, encrypts the
//! secret under that capability's predicate and stores the bundle on the
//! ledger. Revealing reads the bundle back and asks the network for the key
//! with a fresh challenge. Nothing is cached between calls.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info};

use capseal_auth::{ChallengeAuthenticator, Signer};
use capseal_core::{CapabilityId, Clock, ConditionBuilder, Identity, SystemClock};
use capseal_gateway::{CiphertextBundle, DecryptionNetwork, EncryptionGateway};
use capseal_registry::{LedgerCall, Registry, RegistryError, RegistryExt};

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::pointer::ContentPointer;

/// A secret that has been sealed and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub capability_id: CapabilityId,
    pub bundle: CiphertextBundle,
}

/// Outcome of a reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revealed {
    Secret(Bytes),
    /// The capability exists but nothing has been sealed to it yet.
    Pending,
}

/// Where a capability is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretState {
    Created(CapabilityId),
    Sealed(CapabilityId),
}

/// Seals, reveals and transfers secrets.
///
/// `Vault` is `Send + Sync`; share it with an `Arc` for concurrent use.
pub struct Vault<R: Registry, N: DecryptionNetwork> {
    registry: Arc<R>,
    gateway: EncryptionGateway<N>,
    authenticator: ChallengeAuthenticator,
    conditions: ConditionBuilder,
    config: VaultConfig,
}

impl<R: Registry, N: DecryptionNetwork> Vault<R, N> {
    pub fn new(registry: Arc<R>, network: N, config: VaultConfig) -> Self {
        Self::with_clock(registry, network, config, Arc::new(SystemClock))
    }

    /// Stamp challenges with `clock`.
    pub fn with_clock(
        registry: Arc<R>,
        network: N,
        config: VaultConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let authenticator = ChallengeAuthenticator::with_clock(
            config.audience.clone(),
            config.coordinates.chain.clone(),
            clock,
        );
        Self {
            registry,
            gateway: EncryptionGateway::with_config(network, config.gateway),
            authenticator,
            conditions: ConditionBuilder::new(config.coordinates.clone()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    pub fn gateway(&self) -> &EncryptionGateway<N> {
        &self.gateway
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn conditions(&self) -> &ConditionBuilder {
        &self.conditions
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a capability for the signer and seal `plaintext` to it.
    ///
    /// Once the capability is final, any later failure is reported as
    /// [`VaultError::Unsealed`]; the ID stays allocated and
    /// [`Vault::seal_existing`] can finish the job.
    pub async fn seal(&self, signer: &dyn Signer, plaintext: &[u8]) -> Result<SealedSecret> {
        let creator = identity_of(signer)?;

        let receipt = self
            .registry
            .execute(&creator, LedgerCall::Create, self.config.confirmation_timeout)
            .await?;
        let id = receipt.created_capability().ok_or_else(|| {
            RegistryError::InvalidData(format!("receipt {} has no creation event", receipt.tx))
        })?;
        debug!(%id, block = receipt.block, "capability created, sealing");

        self.complete(&creator, id, plaintext)
            .await
            .map_err(|source| {
                error!(%id, error = %source, "capability created but sealing failed");
                VaultError::Unsealed {
                    capability_id: id,
                    source: Box::new(source),
                }
            })
    }

    /// Seal `plaintext` to a capability that exists but holds no secret yet.
    pub async fn seal_existing(
        &self,
        signer: &dyn Signer,
        id: CapabilityId,
        plaintext: &[u8],
    ) -> Result<SealedSecret> {
        let caller = identity_of(signer)?;

        // Ownership is checked when the pointer write is submitted.
        if self.registry.content_pointer(id).await?.is_some() {
            return Err(RegistryError::PointerAlreadySet(id).into());
        }

        self.complete(&caller, id, plaintext).await
    }

    async fn complete(
        &self,
        owner: &Identity,
        id: CapabilityId,
        plaintext: &[u8],
    ) -> Result<SealedSecret> {
        let predicate = self.conditions.build(id);
        let bundle = self
            .gateway
            .encrypt_under_predicate(plaintext, &predicate)
            .await?;

        let pointer = ContentPointer::encode(id, &bundle)?;
        debug!(%id, bytes = pointer.len(), "persisting content pointer");
        self.registry
            .execute(
                owner,
                LedgerCall::SetContentPointer { id, pointer },
                self.config.confirmation_timeout,
            )
            .await?;

        info!(%id, "secret sealed");
        Ok(SealedSecret {
            capability_id: id,
            bundle,
        })
    }

    /// Decrypt the secret behind `id` for the signer, if the registry says
    /// they may read it.
    pub async fn reveal(&self, signer: &dyn Signer, id: CapabilityId) -> Result<Revealed> {
        let pointer = self.registry.content_pointer(id).await?;
        let bundle = match ContentPointer::parse(id, pointer.as_deref())? {
            ContentPointer::Pending => {
                debug!(%id, "secret not sealed yet");
                return Ok(Revealed::Pending);
            }
            ContentPointer::Populated(bundle) => bundle,
        };

        if bundle.predicate != self.conditions.build(id) {
            error!(%id, "stored bundle is bound to a different predicate");
            return Err(VaultError::PredicateMismatch { id });
        }

        let challenge = self.authenticator.issue(signer).await?;
        let plaintext = self
            .gateway
            .decrypt_under_predicate(&bundle, &challenge)
            .await?;

        info!(%id, identity = ?challenge.identity, "secret revealed");
        Ok(Revealed::Secret(plaintext))
    }

    /// Hand ownership of `id` to `to`. The creator keeps access.
    pub async fn transfer(&self, signer: &dyn Signer, id: CapabilityId, to: Identity) -> Result<()> {
        let from = identity_of(signer)?;
        self.registry
            .execute(
                &from,
                LedgerCall::Transfer { id, to },
                self.config.confirmation_timeout,
            )
            .await?;

        debug!(%id, from = ?from, to = ?to, "transfer final");
        Ok(())
    }

    /// Whether `id` has a sealed secret.
    pub async fn status(&self, id: CapabilityId) -> Result<SecretState> {
        let pointer = self.registry.content_pointer(id).await?;
        Ok(match ContentPointer::parse(id, pointer.as_deref())? {
            ContentPointer::Pending => SecretState::Created(id),
            ContentPointer::Populated(_) => SecretState::Sealed(id),
        })
    }
}

fn identity_of(signer: &dyn Signer) -> Result<Identity> {
    signer.identity().ok_or(VaultError::NoSigningCapability)
}
