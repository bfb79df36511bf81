//! Configuration of the session core.
//!
//! Built from a TOML document or from the environment:
//!
//! ```toml
//! [network]
//! required_chain_id = 31337
//! rpc_endpoint = "http://127.0.0.1:8545"
//!
//! [token]
//! registry_key = "TokenModule#Token"
//! poll_interval_ms = 1000
//! ```
use std::{path::Path, time::Duration};

use alloy_primitives::U256;
use eyre::{ensure, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::wallet::ChainId;

pub(crate) const RPC_URL_ENV_VAR_NAME: &str = "RPC_URL";
pub(crate) const CHAIN_ID_ENV_VAR_NAME: &str = "CHAIN_ID";
pub(crate) const POLL_INTERVAL_ENV_VAR_NAME: &str = "POLL_INTERVAL_MS";

/// Chain id of a local Hardhat/Anvil node.
pub const DEFAULT_CHAIN_ID: u64 = 31337;
/// JSON-RPC endpoint of a local node.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
/// Registry key under which the token deployment is recorded.
pub const DEFAULT_REGISTRY_KEY: &str = "TokenModule#Token";
/// Balance refresh period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The network the session must run on. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequirement {
    /// Chain the wallet must be connected to.
    pub required_chain_id: ChainId,
    /// JSON-RPC endpoint serving that chain.
    pub rpc_endpoint: Url,
}

impl Default for NetworkRequirement {
    fn default() -> Self {
        Self {
            required_chain_id: U256::from(DEFAULT_CHAIN_ID),
            rpc_endpoint: Url::parse(DEFAULT_RPC_URL)
                .expect("default rpc url is valid"),
        }
    }
}

/// Full configuration of a [`crate::SessionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DappConfig {
    /// Network enforcement.
    pub network: NetworkRequirement,
    /// Address registry key of the token deployment.
    pub registry_key: String,
    /// Balance refresh period.
    pub poll_interval: Duration,
}

impl Default for DappConfig {
    fn default() -> Self {
        Self {
            network: NetworkRequirement::default(),
            registry_key: DEFAULT_REGISTRY_KEY.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    network: RawNetwork,
    #[serde(default)]
    token: RawToken,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawNetwork {
    required_chain_id: Option<u64>,
    rpc_endpoint: Option<Url>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawToken {
    registry_key: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl DappConfig {
    /// Parses a TOML document. Missing keys fall back to the defaults.
    ///
    /// # Errors
    ///
    /// May fail if the document is not valid TOML, has unknown keys or sets
    /// a zero poll interval.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(source).wrap_err("failed to parse dapp config")?;
        let defaults = Self::default();
        let poll_interval = match raw.token.poll_interval_ms {
            Some(millis) => poll_interval(millis)?,
            None => defaults.poll_interval,
        };

        Ok(Self {
            network: NetworkRequirement {
                required_chain_id: raw
                    .network
                    .required_chain_id
                    .map_or(defaults.network.required_chain_id, U256::from),
                rpc_endpoint: raw
                    .network
                    .rpc_endpoint
                    .unwrap_or(defaults.network.rpc_endpoint),
            },
            registry_key: raw.token.registry_key.unwrap_or(defaults.registry_key),
            poll_interval,
        })
    }

    /// Reads and parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// May fail if the file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Builds the configuration from `RPC_URL`, `CHAIN_ID` and
    /// `POLL_INTERVAL_MS`. Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// May fail if a variable is set but can't be parsed, or if
    /// `POLL_INTERVAL_MS` is zero.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env(RPC_URL_ENV_VAR_NAME) {
            config.network.rpc_endpoint = url
                .parse()
                .wrap_err("failed to parse RPC_URL string into a URL")?;
        }
        if let Some(chain_id) = env(CHAIN_ID_ENV_VAR_NAME) {
            let chain_id: u64 =
                chain_id.parse().wrap_err("failed to parse CHAIN_ID")?;
            config.network.required_chain_id = U256::from(chain_id);
        }
        if let Some(interval) = env(POLL_INTERVAL_ENV_VAR_NAME) {
            let millis: u64 =
                interval.parse().wrap_err("failed to parse POLL_INTERVAL_MS")?;
            config.poll_interval = poll_interval(millis)?;
        }

        Ok(config)
    }
}

/// A refresh period of `millis` milliseconds. Must be non-zero.
fn poll_interval(millis: u64) -> Result<Duration> {
    ensure!(millis > 0, "poll interval must be greater than zero");
    Ok(Duration::from_millis(millis))
}

/// Load the `name` environment variable, treating empty values as unset.
fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DappConfig::from_toml_str("").unwrap();
        assert_eq!(config, DappConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.network.required_chain_id, U256::from(31337));
    }

    #[test]
    fn parses_overrides() {
        let config = DappConfig::from_toml_str(
            r#"
            [network]
            required_chain_id = 43113
            rpc_endpoint = "https://api.avax-test.network/ext/bc/C/rpc"

            [token]
            registry_key = "TokenModule#Token"
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.network.required_chain_id, U256::from(43113));
        assert_eq!(
            config.network.rpc_endpoint.as_str(),
            "https://api.avax-test.network/ext/bc/C/rpc"
        );
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = DappConfig::from_toml_str("[network]\nchain = 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = DappConfig::from_toml_str("[token]\npoll_interval_ms = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        assert!(poll_interval(0).is_err());
        assert_eq!(poll_interval(1).unwrap(), Duration::from_millis(1));
    }
}
