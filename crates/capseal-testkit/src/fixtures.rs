//! Test fixtures and helpers.
//!
//! Named parties with fixed keys and a vault wired over the memory ledger
//! and the in-process network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use capseal::{Result, Vault, VaultConfig};
use capseal_auth::{Audience, SignError, Signer};
use capseal_core::{Identity, Keypair, ManualClock, Signature};
use capseal_gateway::{GatewayConfig, MemoryNetwork, NetworkConfig, RetryPolicy, DEFAULT_NODES};
use capseal_registry::{
    Allowlist, Ledger, LedgerConfig, MemoryRegistryStore, Open, RegistryStore,
};

pub const ALICE_SEED: [u8; 32] = [0xa1; 32];
pub const BOB_SEED: [u8; 32] = [0xb0; 32];
pub const CAROL_SEED: [u8; 32] = [0xca; 32];

pub fn alice() -> Keypair {
    Keypair::from_seed(&ALICE_SEED)
}

pub fn bob() -> Keypair {
    Keypair::from_seed(&BOB_SEED)
}

pub fn carol() -> Keypair {
    Keypair::from_seed(&CAROL_SEED)
}

/// Audience every fixture challenge is addressed to.
pub fn test_audience() -> Audience {
    Audience::new("capseal.test", "https://capseal.test")
}

/// A signer whose user refuses every signature request.
pub struct DecliningSigner(pub Identity);

#[async_trait]
impl Signer for DecliningSigner {
    fn identity(&self) -> Option<Identity> {
        Some(self.0)
    }

    async fn sign(&self, _message: &[u8]) -> std::result::Result<Signature, SignError> {
        Err(SignError::Declined)
    }
}

/// A signer with no identity at all, like a disconnected wallet.
pub struct WatchOnlySigner;

#[async_trait]
impl Signer for WatchOnlySigner {
    fn identity(&self) -> Option<Identity> {
        None
    }

    async fn sign(&self, _message: &[u8]) -> std::result::Result<Signature, SignError> {
        Err(SignError::Failed("no key".into()))
    }
}

pub type TestLedger<S = MemoryRegistryStore> = Ledger<S>;
pub type TestNetwork<S = MemoryRegistryStore> = MemoryNetwork<Ledger<S>>;
pub type TestVault<S = MemoryRegistryStore> = Vault<Ledger<S>, Arc<TestNetwork<S>>>;

/// A fully wired vault with alice, bob and carol.
pub struct TestFixture<S: RegistryStore = MemoryRegistryStore> {
    pub ledger: Arc<TestLedger<S>>,
    pub network: Arc<TestNetwork<S>>,
    pub vault: Arc<TestVault<S>>,
    pub clock: Arc<ManualClock>,
    pub alice: Keypair,
    pub bob: Keypair,
    pub carol: Keypair,
}

impl TestFixture<MemoryRegistryStore> {
    /// Alice is the only identity allowed to create capabilities.
    pub async fn new() -> Result<Self> {
        FixtureBuilder::default().build().await
    }

    pub fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }
}

/// Options for a [`TestFixture`].
#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    /// Identities allowed to create. `None` lets anyone create.
    pub creators: Option<Vec<Identity>>,
    pub auto_mine: bool,
    pub nodes: usize,
    pub confirmation_timeout: Duration,
    pub gateway: GatewayConfig,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            creators: Some(vec![alice().identity()]),
            auto_mine: true,
            nodes: DEFAULT_NODES,
            confirmation_timeout: Duration::from_secs(5),
            gateway: GatewayConfig {
                request_timeout: Duration::from_secs(5),
                retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::from_millis(5),
                },
            },
        }
    }
}

impl FixtureBuilder {
    pub fn open_creation(mut self) -> Self {
        self.creators = None;
        self
    }

    pub fn auto_mine(mut self, auto_mine: bool) -> Self {
        self.auto_mine = auto_mine;
        self
    }

    pub fn nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    pub async fn build(self) -> Result<TestFixture<MemoryRegistryStore>> {
        self.build_with_store(MemoryRegistryStore::new()).await
    }

    /// Wire everything over `store`, resuming whatever it already holds.
    pub async fn build_with_store<S: RegistryStore + 'static>(
        self,
        store: S,
    ) -> Result<TestFixture<S>> {
        let alice = alice();
        let mut ledger_config = LedgerConfig::deployed_by(&alice.identity());
        ledger_config.auto_mine = self.auto_mine;
        let coordinates = ledger_config.coordinates();

        let ledger = Arc::new(match self.creators {
            Some(creators) => Ledger::open(store, Allowlist::new(creators), ledger_config).await?,
            None => Ledger::open(store, Open, ledger_config).await?,
        });

        let clock = Arc::new(ManualClock::starting_now());
        let network = Arc::new(MemoryNetwork::with_clock(
            ledger.clone(),
            NetworkConfig::new(coordinates.clone(), test_audience()).with_nodes(self.nodes),
            clock.clone(),
        )?);

        let config = VaultConfig {
            audience: test_audience(),
            coordinates,
            confirmation_timeout: self.confirmation_timeout,
            gateway: self.gateway,
        };
        let vault = Arc::new(Vault::with_clock(
            ledger.clone(),
            network.clone(),
            config,
            clock.clone(),
        ));

        Ok(TestFixture {
            ledger,
            network,
            vault,
            clock,
            alice,
            bob: bob(),
            carol: carol(),
        })
    }
}
