//! Vault configuration.

use std::time::Duration;

use capseal_auth::Audience;
use capseal_core::RegistryCoordinates;
use capseal_gateway::GatewayConfig;
use capseal_registry::LedgerConfig;

/// Configuration for a [`crate::Vault`].
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Who challenges are addressed to. Must match the network's audience.
    pub audience: Audience,
    /// Registry the vault's predicates point at.
    pub coordinates: RegistryCoordinates,
    /// How long to wait for a ledger write to become final.
    pub confirmation_timeout: Duration,
    pub gateway: GatewayConfig,
}

impl VaultConfig {
    pub fn new(audience: Audience, coordinates: RegistryCoordinates) -> Self {
        Self {
            audience,
            coordinates,
            ..Self::default()
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            audience: Audience::new("capseal.local", "https://capseal.local"),
            coordinates: LedgerConfig::default().coordinates(),
            confirmation_timeout: Duration::from_secs(30),
            gateway: GatewayConfig::default(),
        }
    }
}
