//! The encryption gateway.
//!
//! Client side of the decryption network: seals plaintext under a predicate
//! and opens bundles once the network releases the key. Every round trip is
//! bounded by a timeout and retried only when the failure is transient.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};

use capseal_auth::ChallengeStatement;
use capseal_core::AccessPredicate;

use crate::bundle::CiphertextBundle;
use crate::crypto::X25519StaticSecret;
use crate::error::{GatewayError, NetworkError, Result};
use crate::keyshare::{combine_shares, KeyShare};
use crate::network::{DecryptionNetwork, KeyId, KeyRequest, ReleaseRequest};

/// Retry schedule for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before the attempt following attempt number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bound on each network round trip.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Encrypts and decrypts under access predicates via a decryption network.
pub struct EncryptionGateway<N: DecryptionNetwork> {
    network: N,
    config: GatewayConfig,
}

impl<N: DecryptionNetwork> EncryptionGateway<N> {
    pub fn new(network: N) -> Self {
        Self::with_config(network, GatewayConfig::default())
    }

    pub fn with_config(network: N, config: GatewayConfig) -> Self {
        Self { network, config }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Seal `plaintext` so that only callers satisfying `predicate` can open it.
    pub async fn encrypt_under_predicate(
        &self,
        plaintext: &[u8],
        predicate: &AccessPredicate,
    ) -> Result<CiphertextBundle> {
        let id = predicate.capability_id()?;
        let request = KeyRequest {
            predicate: predicate.clone(),
            key_id: KeyId::generate(),
        };

        debug!(%id, key_id = ?request.key_id, "requesting encryption key");
        let material = self
            .with_retry("derive_encryption_key", || {
                self.network.derive_encryption_key(&request)
            })
            .await?;

        CiphertextBundle::seal(plaintext, &request, &material)
    }

    /// Open `bundle` for the identity `challenge` proves.
    pub async fn decrypt_under_predicate(
        &self,
        bundle: &CiphertextBundle,
        challenge: &ChallengeStatement,
    ) -> Result<Bytes> {
        if let Err(err) = bundle.verify_integrity() {
            error!(key_id = ?bundle.key_id, error = %err, "rejecting corrupt bundle");
            return Err(err);
        }

        let recipient = X25519StaticSecret::generate();
        let request = ReleaseRequest {
            key: bundle.key_request(),
            shares: bundle.shares.clone(),
            recipient: recipient.public_key(),
        };

        debug!(key_id = ?bundle.key_id, identity = ?challenge.identity, "requesting key release");
        let released = self
            .with_retry("release_decryption_key", || {
                self.network.release_decryption_key(&request, challenge)
            })
            .await?;

        let plaintext = self.open_released(bundle, &request, &recipient, &released);
        if let Err(err) = &plaintext {
            error!(key_id = ?bundle.key_id, error = %err, "released key does not open bundle");
        }
        plaintext
    }

    fn open_released(
        &self,
        bundle: &CiphertextBundle,
        request: &ReleaseRequest,
        recipient: &X25519StaticSecret,
        released: &[KeyShare],
    ) -> Result<Bytes> {
        let mut expected: Vec<_> = bundle.shares.iter().map(|s| s.node).collect();
        let mut returned: Vec<_> = released.iter().map(|s| s.node).collect();
        expected.sort();
        returned.sort();
        if expected != returned {
            return Err(GatewayError::BundleCorrupt(format!(
                "network released {} shares for {} nodes",
                released.len(),
                bundle.shares.len()
            )));
        }

        let predicate_hash = bundle.predicate.hash()?;
        let shares = released
            .iter()
            .map(|share| {
                share.unwrap_with(recipient, &request.key.share_context(&predicate_hash, share.node))
            })
            .collect::<Result<Vec<_>>>()?;

        let key = combine_shares(&shares);
        bundle.open(&key).map(Bytes::from)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, NetworkError>>,
    {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.config.request_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(NetworkError::Timeout(self.config.request_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(operation, attempt, error = %err, ?delay, "network call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if let NetworkError::Denied { id, identity } = &err {
                        warn!(operation, %id, identity = ?identity, "access denied");
                    } else if let NetworkError::ChallengeRejected(reason) = &err {
                        warn!(operation, %reason, "challenge rejected");
                    } else if let NetworkError::ShareRejected(reason) = &err {
                        error!(operation, %reason, "network could not open bundle shares");
                    }
                    return Err(err.into());
                }
            }
        }
    }
}
