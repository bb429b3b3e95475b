//! An in-process decryption network.
//!
//! Runs N nodes side by side. Each node holds its own secret and decides
//! on its own: it checks the predicate targets the registry it knows,
//! verifies the challenge, and evaluates the predicate against the live
//! registry. The content key needs every node's share.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use capseal_auth::{verify_challenge, Audience, ChallengeStatement};
use capseal_core::{AccessPredicate, Blake3Hash, Clock, RegistryCoordinates, SystemClock};
use capseal_registry::{Registry, RegistryError};

use crate::crypto::{random_bytes, X25519StaticSecret};
use crate::error::NetworkError;
use crate::keyshare::{KeyShare, NodeId};
use crate::network::{
    DecryptionNetwork, KeyId, KeyMaterial, KeyRequest, NodeKey, ReleaseRequest, Result,
};

/// Default number of nodes.
pub const DEFAULT_NODES: usize = 3;

/// Node IDs are `u16`, which caps the node count.
pub const MAX_NODES: usize = u16::MAX as usize + 1;

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub nodes: usize,
    /// The only registry predicates may target.
    pub coordinates: RegistryCoordinates,
    /// Audience challenges must be addressed to.
    pub audience: Audience,
}

impl NetworkConfig {
    pub fn new(coordinates: RegistryCoordinates, audience: Audience) -> Self {
        Self {
            nodes: DEFAULT_NODES,
            coordinates,
            audience,
        }
    }

    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    /// Reject node counts that cannot be addressed.
    pub fn validate(&self) -> Result<()> {
        if self.nodes > MAX_NODES {
            return Err(NetworkError::InvalidConfig(format!(
                "{} nodes requested, at most {MAX_NODES} can be addressed",
                self.nodes
            )));
        }
        Ok(())
    }
}

struct Node {
    id: NodeId,
    secret: [u8; 32],
}

impl Node {
    /// Secret bound to one predicate and key ID; never leaves the node.
    fn condition_secret(&self, predicate_hash: &Blake3Hash, key_id: &KeyId) -> X25519StaticSecret {
        let mut hasher = blake3::Hasher::new_keyed(&self.secret);
        hasher.update(b"capseal-node-v0-condition");
        hasher.update(predicate_hash.as_bytes());
        hasher.update(key_id.as_bytes());
        X25519StaticSecret::from_bytes(*hasher.finalize().as_bytes())
    }

    fn public_key(&self, request: &KeyRequest, predicate_hash: &Blake3Hash) -> NodeKey {
        NodeKey {
            node: self.id,
            public: self
                .condition_secret(predicate_hash, &request.key_id)
                .public_key(),
        }
    }

    /// Open this node's share and re-wrap it for the requester.
    fn rewrap(
        &self,
        request: &ReleaseRequest,
        predicate_hash: &Blake3Hash,
        share: &KeyShare,
    ) -> Result<KeyShare> {
        let context = request.key.share_context(predicate_hash, self.id);
        let secret = self.condition_secret(predicate_hash, &request.key.key_id);

        let opened = share
            .unwrap_with(&secret, &context)
            .map_err(|e| NetworkError::ShareRejected(format!("{}: {}", self.id, e)))?;

        KeyShare::wrap(self.id, &opened, &request.recipient, &context)
            .map_err(|e| NetworkError::ShareRejected(format!("{}: {}", self.id, e)))
    }
}

/// In-process reference network over a live registry.
pub struct MemoryNetwork<R: Registry> {
    registry: Arc<R>,
    config: NetworkConfig,
    nodes: Vec<Node>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl<R: Registry> MemoryNetwork<R> {
    pub fn new(registry: Arc<R>, config: NetworkConfig) -> Result<Self> {
        Self::with_clock(registry, config, Arc::new(SystemClock))
    }

    /// Use `clock` for challenge expiry checks.
    pub fn with_clock(
        registry: Arc<R>,
        config: NetworkConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let nodes = (0..=u16::MAX)
            .take(config.nodes)
            .map(|id| Node {
                id: NodeId(id),
                secret: random_bytes(),
            })
            .collect();

        Ok(Self {
            registry,
            config,
            nodes,
            clock,
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Make every request fail as unavailable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn reach(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) || self.nodes.is_empty() {
            return Err(NetworkError::Unavailable("no nodes reachable".into()));
        }
        Ok(())
    }

    fn check_predicate(&self, predicate: &AccessPredicate) -> Result<Blake3Hash> {
        if !predicate.targets(&self.config.coordinates) {
            return Err(NetworkError::InvalidPredicate(format!(
                "unknown registry {} on {}",
                predicate.contract, predicate.chain
            )));
        }
        predicate
            .capability_id()
            .map_err(|e| NetworkError::InvalidPredicate(e.to_string()))?;
        predicate
            .hash()
            .map_err(|e| NetworkError::InvalidPredicate(e.to_string()))
    }

    /// One node's independent decision on a release request.
    async fn authorize(
        &self,
        node: &Node,
        predicate: &AccessPredicate,
        challenge: &ChallengeStatement,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let identity = verify_challenge(challenge, &self.config.audience, now)
            .and_then(|identity| {
                challenge.ensure_chain(&self.config.coordinates.chain)?;
                Ok(identity)
            })
            .map_err(NetworkError::ChallengeRejected)?;

        let call = predicate
            .resolve(&identity)
            .map_err(|e| NetworkError::InvalidPredicate(e.to_string()))?;

        let returned = match self
            .registry
            .evaluate(call.capability_id, &call.identity)
            .await
        {
            Ok(returned) => returned,
            Err(RegistryError::NotFound(id)) => return Err(NetworkError::UnknownCapability(id)),
            Err(err) => return Err(NetworkError::Unavailable(err.to_string())),
        };

        if !predicate.accepts(returned) {
            warn!(node = %node.id, id = %call.capability_id, identity = ?identity, "predicate not satisfied");
            return Err(NetworkError::Denied {
                id: call.capability_id,
                identity,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Registry> DecryptionNetwork for MemoryNetwork<R> {
    async fn derive_encryption_key(&self, request: &KeyRequest) -> Result<KeyMaterial> {
        self.reach().await?;
        let predicate_hash = self.check_predicate(&request.predicate)?;

        debug!(key_id = ?request.key_id, nodes = self.nodes.len(), "deriving encryption keys");
        Ok(KeyMaterial {
            node_keys: self
                .nodes
                .iter()
                .map(|node| node.public_key(request, &predicate_hash))
                .collect(),
        })
    }

    async fn release_decryption_key(
        &self,
        request: &ReleaseRequest,
        challenge: &ChallengeStatement,
    ) -> Result<Vec<KeyShare>> {
        self.reach().await?;
        let predicate = &request.key.predicate;
        let predicate_hash = self.check_predicate(predicate)?;

        if request.shares.len() != self.nodes.len() {
            return Err(NetworkError::ShareRejected(format!(
                "expected {} shares, got {}",
                self.nodes.len(),
                request.shares.len()
            )));
        }

        debug!(key_id = ?request.key.key_id, identity = ?challenge.identity, "release requested");

        let mut released = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            self.authorize(node, predicate, challenge).await?;

            let share = request
                .shares
                .iter()
                .find(|share| share.node == node.id)
                .ok_or_else(|| NetworkError::ShareRejected(format!("no share for {}", node.id)))?;
            released.push(node.rewrap(request, &predicate_hash, share)?);
        }
        Ok(released)
    }
}
