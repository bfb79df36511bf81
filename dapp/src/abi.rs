//! Schema of the static deployment artifacts: the contract ABI document and
//! the address registry written by the deployment module.
use std::collections::HashMap;

use alloy_primitives::Address;
use eyre::{Context, ContextCompat, Result};
use serde::{Deserialize, Serialize};

/// A compiled contract artifact. Only the `abi` key is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// ABI entries.
    pub abi: Vec<AbiItem>,
}

/// One ABI entry (function, event, error, constructor, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiItem {
    /// Entry kind, e.g. `event`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Entry name. Constructors and fallbacks have none.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
}

/// A declared input of an ABI entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    /// Parameter name. May be empty.
    #[serde(default)]
    pub name: String,
    /// Canonical Solidity type, e.g. `uint256`.
    #[serde(rename = "type")]
    pub ty: String,
    /// Whether an event parameter is stored in a topic.
    #[serde(default)]
    pub indexed: bool,
}

/// An event name and its ordered argument types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    /// Event name.
    pub name: String,
    /// Argument types in declaration order.
    pub arg_types: Vec<String>,
}

impl EventSpec {
    /// Creates an event spec from a name and its argument types.
    pub fn new<I, S>(name: impl Into<String>, arg_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            arg_types: arg_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl Artifact {
    /// Parses an artifact from JSON.
    ///
    /// # Errors
    ///
    /// May fail if `json` doesn't match the artifact schema.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse contract artifact")
    }

    /// Finds the event called `name` and derives its [`EventSpec`].
    #[must_use]
    pub fn event(&self, name: &str) -> Option<EventSpec> {
        self.abi
            .iter()
            .find(|item| item.kind == "event" && item.name.as_deref() == Some(name))
            .map(|item| EventSpec {
                name: name.to_owned(),
                arg_types: item.inputs.iter().map(|input| input.ty.clone()).collect(),
            })
    }
}

/// Deployed addresses keyed by module-qualified contract name, e.g.
/// `TokenModule#Token`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressRegistry(pub HashMap<String, Address>);

impl AddressRegistry {
    /// Parses a registry from JSON.
    ///
    /// # Errors
    ///
    /// May fail if `json` is not an object of addresses.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse address registry")
    }

    /// Address recorded under `key`.
    ///
    /// # Errors
    ///
    /// May fail if nothing is recorded under `key`.
    pub fn address(&self, key: &str) -> Result<Address> {
        self.0
            .get(key)
            .copied()
            .with_context(|| format!("contract address `{key}` not found in registry"))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    const TOKEN_ARTIFACT: &str = r#"{
        "contractName": "Token",
        "abi": [
            { "type": "constructor", "inputs": [] },
            {
                "type": "event",
                "name": "Transfer",
                "anonymous": false,
                "inputs": [
                    { "name": "_from", "type": "address", "indexed": true },
                    { "name": "_to", "type": "address", "indexed": true },
                    { "name": "_value", "type": "uint256", "indexed": false }
                ]
            },
            {
                "type": "function",
                "name": "transfer",
                "stateMutability": "nonpayable",
                "inputs": [
                    { "name": "to", "type": "address" },
                    { "name": "amount", "type": "uint256" }
                ],
                "outputs": []
            }
        ]
    }"#;

    #[test]
    fn derives_event_spec_from_abi() {
        let artifact = Artifact::from_json(TOKEN_ARTIFACT).unwrap();
        let spec = artifact.event("Transfer").unwrap();
        assert_eq!(spec, EventSpec::new("Transfer", ["address", "address", "uint256"]));
    }

    #[test]
    fn functions_are_not_events() {
        let artifact = Artifact::from_json(TOKEN_ARTIFACT).unwrap();
        assert!(artifact.event("transfer").is_none());
        assert!(artifact.event("Approval").is_none());
    }

    #[test]
    fn looks_up_registry_keys() {
        let registry = AddressRegistry::from_json(
            r#"{ "TokenModule#Token": "0x5FbDB2315678afecb367f032d93F642f64180aa3" }"#,
        )
        .unwrap();
        assert_eq!(
            registry.address("TokenModule#Token").unwrap(),
            address!("5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert!(registry.address("TokenModule#Missing").is_err());
    }
}
