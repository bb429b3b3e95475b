//! Access predicates: portable descriptions of a registry check.
//!
//! A predicate says "call `canAccess(capabilityId, caller)` on the registry
//! contract at these coordinates; the result must be `true`". The caller's
//! identity is left as a placeholder that the decryption network fills in
//! from the authenticated challenge, so the predicate can be evaluated
//! without trusting whoever presents it.

use ciborium::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::canonical::{canonical_encode, int_map};
use crate::crypto::{hex_serde, Blake3Hash, Identity};
use crate::error::{CoreError, Result};
use crate::types::CapabilityId;

/// The condition type understood by the decryption network.
pub const CONDITION_TYPE: &str = "registryContract";

/// Placeholder substituted with the authenticated caller's identity.
pub const CALLER_PLACEHOLDER: &str = ":callerIdentity";

/// Name of the registry's evaluation function.
pub const EVALUATE_FUNCTION: &str = "canAccess";

/// Address of a deployed registry contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractAddress(pub [u8; 32]);

hex_serde!(ContractAddress, 32);

impl ContractAddress {
    /// Derive a contract address from its deployer and a deployment label.
    pub fn derive(deployer: &Identity, label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"capseal-contract-v0:");
        hasher.update(deployer.as_bytes());
        hasher.update(b":");
        hasher.update(label.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractAddress({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Where the registry lives: the chain name and the contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryCoordinates {
    pub chain: String,
    pub contract: ContractAddress,
}

impl RegistryCoordinates {
    pub fn new(chain: impl Into<String>, contract: ContractAddress) -> Self {
        Self {
            chain: chain.into(),
            contract,
        }
    }
}

/// Type of an evaluation function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    #[serde(rename = "uint64")]
    CapabilityId,
    #[serde(rename = "identity")]
    Identity,
}

impl ParamType {
    fn as_str(self) -> &'static str {
        match self {
            ParamType::CapabilityId => "uint64",
            ParamType::Identity => "identity",
        }
    }
}

/// One named input of the evaluation function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
}

/// The exact shape of the registry function the network must invoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub inputs: Vec<FunctionInput>,
    pub output: String,
}

impl FunctionSignature {
    /// `canAccess(uint64 capabilityId, identity caller) view returns (bool)`.
    pub fn evaluate() -> Self {
        Self {
            name: EVALUATE_FUNCTION.to_string(),
            inputs: vec![
                FunctionInput {
                    name: "capabilityId".to_string(),
                    kind: ParamType::CapabilityId,
                },
                FunctionInput {
                    name: "caller".to_string(),
                    kind: ParamType::Identity,
                },
            ],
            output: "bool".to_string(),
        }
    }

    fn to_cbor(&self) -> Value {
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                Value::Array(vec![
                    Value::Text(input.name.clone()),
                    Value::Text(input.kind.as_str().to_string()),
                ])
            })
            .collect();
        int_map(vec![
            (0, Value::Text(self.name.clone())),
            (1, Value::Array(inputs)),
            (2, Value::Text(self.output.clone())),
        ])
    }
}

/// A positional argument of the evaluation call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PredicateParam {
    /// A fixed value, in its decimal or hex text form.
    Literal(String),
    /// Filled with the authenticated caller at evaluation time.
    Caller,
}

impl PredicateParam {
    fn as_str(&self) -> &str {
        match self {
            PredicateParam::Literal(s) => s,
            PredicateParam::Caller => CALLER_PLACEHOLDER,
        }
    }
}

impl Serialize for PredicateParam {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PredicateParam {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == CALLER_PLACEHOLDER {
            Ok(PredicateParam::Caller)
        } else {
            Ok(PredicateParam::Literal(s))
        }
    }
}

/// Comparison applied to the function's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
}

/// The test the function's return value must pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: Comparator,
    pub value: String,
}

impl ReturnValueTest {
    /// `= "true"`.
    pub fn is_true() -> Self {
        Self {
            comparator: Comparator::Eq,
            value: "true".to_string(),
        }
    }

    /// Apply the test to a boolean return value.
    pub fn accepts(&self, returned: bool) -> bool {
        match self.comparator {
            Comparator::Eq => self.value == returned.to_string(),
        }
    }
}

/// "Capability X, evaluated against caller Y, must report true."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPredicate {
    pub condition_type: String,
    pub chain: String,
    pub contract: ContractAddress,
    pub function: FunctionSignature,
    pub params: Vec<PredicateParam>,
    pub return_test: ReturnValueTest,
}

/// A predicate with its placeholder filled in: the concrete registry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCall {
    pub capability_id: CapabilityId,
    pub identity: Identity,
}

impl AccessPredicate {
    /// Whether this predicate targets the registry at `coordinates`.
    pub fn targets(&self, coordinates: &RegistryCoordinates) -> bool {
        self.chain == coordinates.chain && self.contract == coordinates.contract
    }

    /// The capability this predicate refers to.
    pub fn capability_id(&self) -> Result<CapabilityId> {
        self.validate_shape()?;
        let position = self
            .position_of(ParamType::CapabilityId)
            .ok_or_else(|| CoreError::InvalidPredicate("no capability parameter".into()))?;
        match &self.params[position] {
            PredicateParam::Literal(raw) => raw.parse().map_err(|_| {
                CoreError::InvalidPredicate(format!("capability id is not a number: {raw}"))
            }),
            PredicateParam::Caller => Err(CoreError::InvalidPredicate(
                "caller placeholder in capability position".into(),
            )),
        }
    }

    /// Substitute the caller placeholder and type-check every parameter.
    pub fn resolve(&self, caller: &Identity) -> Result<ResolvedCall> {
        let capability_id = self.capability_id()?;

        let position = self
            .position_of(ParamType::Identity)
            .ok_or_else(|| CoreError::InvalidPredicate("no identity parameter".into()))?;
        if self.params[position] != PredicateParam::Caller {
            return Err(CoreError::InvalidPredicate(
                "identity parameter must be the caller placeholder".into(),
            ));
        }

        Ok(ResolvedCall {
            capability_id,
            identity: *caller,
        })
    }

    /// Apply the return value test to the registry's answer.
    pub fn accepts(&self, returned: bool) -> bool {
        self.return_test.accepts(returned)
    }

    /// Deterministic CBOR encoding of this predicate.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let params = self
            .params
            .iter()
            .map(|p| Value::Text(p.as_str().to_string()))
            .collect();
        let return_test = Value::Array(vec![
            Value::Text("=".to_string()),
            Value::Text(self.return_test.value.clone()),
        ]);
        let value = int_map(vec![
            (0, Value::Text(self.condition_type.clone())),
            (1, Value::Text(self.chain.clone())),
            (2, Value::Bytes(self.contract.0.to_vec())),
            (3, self.function.to_cbor()),
            (4, Value::Array(params)),
            (5, return_test),
        ]);
        canonical_encode(&value)
    }

    /// Blake3 over the canonical bytes.
    pub fn hash(&self) -> Result<Blake3Hash> {
        Ok(Blake3Hash::hash(&self.canonical_bytes()?))
    }

    fn position_of(&self, kind: ParamType) -> Option<usize> {
        self.function.inputs.iter().position(|i| i.kind == kind)
    }

    fn validate_shape(&self) -> Result<()> {
        if self.condition_type != CONDITION_TYPE {
            return Err(CoreError::InvalidPredicate(format!(
                "unsupported condition type: {}",
                self.condition_type
            )));
        }
        if self.function != FunctionSignature::evaluate() {
            return Err(CoreError::InvalidPredicate(format!(
                "unexpected function signature: {}",
                self.function.name
            )));
        }
        if self.params.len() != self.function.inputs.len() {
            return Err(CoreError::InvalidPredicate(format!(
                "expected {} params, got {}",
                self.function.inputs.len(),
                self.params.len()
            )));
        }
        let placeholders = self
            .params
            .iter()
            .filter(|p| **p == PredicateParam::Caller)
            .count();
        if placeholders != 1 {
            return Err(CoreError::InvalidPredicate(format!(
                "expected exactly one caller placeholder, got {placeholders}"
            )));
        }
        if self.return_test != ReturnValueTest::is_true() {
            return Err(CoreError::InvalidPredicate(
                "return value test must be `= true`".into(),
            ));
        }
        Ok(())
    }
}

/// Translates capability IDs into predicates for a known registry.
///
/// Pure: no I/O, and the same ID always yields the same predicate.
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    coordinates: RegistryCoordinates,
    signature: FunctionSignature,
}

impl ConditionBuilder {
    pub fn new(coordinates: RegistryCoordinates) -> Self {
        Self {
            coordinates,
            signature: FunctionSignature::evaluate(),
        }
    }

    pub fn coordinates(&self) -> &RegistryCoordinates {
        &self.coordinates
    }

    /// Build the predicate for `capability_id`.
    ///
    /// Parameters follow the signature's input order, so the placeholder
    /// always lands where the `identity` input is declared.
    pub fn build(&self, capability_id: CapabilityId) -> AccessPredicate {
        let params = self
            .signature
            .inputs
            .iter()
            .map(|input| match input.kind {
                ParamType::CapabilityId => PredicateParam::Literal(capability_id.to_string()),
                ParamType::Identity => PredicateParam::Caller,
            })
            .collect();

        AccessPredicate {
            condition_type: CONDITION_TYPE.to_string(),
            chain: self.coordinates.chain.clone(),
            contract: self.coordinates.contract,
            function: self.signature.clone(),
            params,
            return_test: ReturnValueTest::is_true(),
        }
    }
}
