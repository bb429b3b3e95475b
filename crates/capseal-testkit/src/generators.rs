//! Proptest generators for property-based testing.

use proptest::prelude::*;

use capseal_core::{
    AccessPredicate, CapabilityId, ConditionBuilder, ContractAddress, Identity, Keypair,
    RegistryCoordinates,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a valid identity.
pub fn identity() -> impl Strategy<Value = Identity> {
    keypair().prop_map(|kp| kp.identity())
}

/// Generate a capability ID (IDs start at 1).
pub fn capability_id() -> impl Strategy<Value = CapabilityId> {
    (1u64..=u64::MAX).prop_map(CapabilityId::new)
}

/// Generate a chain name.
pub fn chain() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,23}".prop_map(String::from)
}

/// Generate registry coordinates.
pub fn coordinates() -> impl Strategy<Value = RegistryCoordinates> {
    (chain(), any::<[u8; 32]>())
        .prop_map(|(chain, contract)| {
            RegistryCoordinates::new(chain, ContractAddress::from_bytes(contract))
        })
}

/// Generate a well-formed predicate.
pub fn predicate() -> impl Strategy<Value = AccessPredicate> {
    (coordinates(), capability_id())
        .prop_map(|(coordinates, id)| ConditionBuilder::new(coordinates).build(id))
}

/// Generate plaintext of at most `max_len` bytes.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}
