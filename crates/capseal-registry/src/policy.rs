//! Who may read a capability, and who may create one.

use std::collections::BTreeSet;
use std::fmt;

use capseal_core::Identity;

use crate::record::Capability;

/// The identities a capability currently grants access to.
///
/// Today that is the owner and the creator; they may coincide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSet(BTreeSet<Identity>);

impl GrantSet {
    /// Grant set of a recorded capability.
    pub fn for_capability(capability: &Capability) -> Self {
        Self([capability.owner, capability.creator].into_iter().collect())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.0.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }
}

/// Decides which identities may create capabilities.
///
/// Configured once at ledger construction.
pub trait CreationPolicy: Send + Sync + fmt::Debug {
    fn may_create(&self, caller: &Identity) -> bool;
}

/// Only the listed identities may create.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    creators: BTreeSet<Identity>,
}

impl Allowlist {
    pub fn new(creators: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            creators: creators.into_iter().collect(),
        }
    }

    /// A single privileged creator, typically the deployer.
    pub fn single(creator: Identity) -> Self {
        Self::new([creator])
    }

    pub fn with(mut self, creator: Identity) -> Self {
        self.creators.insert(creator);
        self
    }
}

impl CreationPolicy for Allowlist {
    fn may_create(&self, caller: &Identity) -> bool {
        self.creators.contains(caller)
    }
}

/// Anyone may create.
#[derive(Debug, Clone, Copy, Default)]
pub struct Open;

impl CreationPolicy for Open {
    fn may_create(&self, _caller: &Identity) -> bool {
        true
    }
}
