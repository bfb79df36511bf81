//! Wallet connection and network enforcement.
use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::NetworkRequirement,
    error::{Error, Result},
    wallet::{
        parse_hex_quantity, ChainId, ProviderError, WalletEvents,
        WalletProvider, WalletRequest,
    },
};

/// Lifecycle phase of the session state machine.
///
/// `Disconnected → Connecting → NetworkCheck → Ready`. `NetworkCheck` is
/// re-entered on every chain change and `Ready` is only reached through a
/// passing check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No session.
    #[default]
    Disconnected,
    /// Waiting for the wallet to hand out an account.
    Connecting,
    /// Validating (and possibly switching) the wallet's chain.
    NetworkCheck,
    /// On the required chain; contract operations are allowed.
    Ready,
}

/// A connected wallet account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Selected account.
    pub address: Address,
    /// Chain the wallet last reported.
    pub chain_id: ChainId,
    /// Always `true` for a live session.
    pub connected: bool,
}

/// Talks to the wallet on behalf of the controller.
#[derive(Clone)]
pub struct SessionManager {
    wallet: Option<Arc<dyn WalletProvider>>,
    requirement: NetworkRequirement,
}

impl SessionManager {
    /// Creates a manager. `wallet` is `None` when no wallet is installed.
    #[must_use]
    pub fn new(
        wallet: Option<Arc<dyn WalletProvider>>,
        requirement: NetworkRequirement,
    ) -> Self {
        Self { wallet, requirement }
    }

    /// The network this manager enforces.
    #[must_use]
    pub fn requirement(&self) -> &NetworkRequirement {
        &self.requirement
    }

    fn wallet(&self) -> Result<&Arc<dyn WalletProvider>> {
        self.wallet.as_ref().ok_or(Error::WalletNotInstalled)
    }

    /// Requests account access and opens a session on the first account.
    ///
    /// # Errors
    ///
    /// * [`Error::WalletNotInstalled`] if no wallet was injected.
    /// * [`Error::UserRejected`] if the user declined the prompt.
    /// * [`Error::RpcFailure`] if the wallet returned no usable account.
    pub async fn connect(&self) -> Result<Session> {
        let wallet = self.wallet()?;
        let accounts = wallet.request(WalletRequest::RequestAccounts).await?;
        let accounts: Vec<Address> = decode(accounts)?;
        let address = accounts.first().copied().ok_or_else(|| {
            Error::RpcFailure("wallet returned no accounts".to_owned())
        })?;
        let chain_id = self.chain_id().await?;

        tracing::info!(%address, %chain_id, "wallet connected");
        Ok(Session { address, chain_id, connected: true })
    }

    /// Opens the wallet's notification stream.
    ///
    /// # Errors
    ///
    /// May fail if no wallet was injected.
    pub fn subscribe(&self) -> Result<WalletEvents> {
        Ok(self.wallet()?.subscribe())
    }

    /// Reads the wallet's current chain id.
    ///
    /// # Errors
    ///
    /// May fail if the wallet request fails or returns a malformed id.
    pub async fn chain_id(&self) -> Result<ChainId> {
        let raw = self.wallet()?.request(WalletRequest::ChainId).await?;
        let raw: String = decode(raw)?;
        Ok(parse_hex_quantity(&raw)?)
    }

    /// Makes sure the wallet is on the required chain, asking it to switch
    /// when it isn't. Returns the chain id the wallet ends up on.
    ///
    /// # Errors
    ///
    /// * [`Error::NetworkSwitchFailed`] if the switch request failed.
    /// * [`Error::NetworkMismatch`] if the wallet accepted the switch but
    ///   still reports another chain.
    pub async fn ensure_network(&self) -> Result<ChainId> {
        let expected = self.requirement.required_chain_id;
        let current = self.chain_id().await?;
        if current == expected {
            return Ok(current);
        }

        tracing::info!(%current, %expected, "wallet on wrong network, requesting switch");
        self.wallet()?
            .request(WalletRequest::SwitchChain { chain_id: expected })
            .await
            .map_err(|err| Error::NetworkSwitchFailed(err.reason().to_owned()))?;

        let actual = self.chain_id().await?;
        if actual != expected {
            return Err(Error::NetworkMismatch { expected, actual });
        }
        Ok(actual)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| {
        Error::from(ProviderError::new(format!("malformed wallet response: {err}")))
    })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};

    use super::*;
    use crate::test_utils::MockWallet;

    const ALICE: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn manager(wallet: &Arc<MockWallet>) -> SessionManager {
        SessionManager::new(
            Some(wallet.clone() as Arc<dyn WalletProvider>),
            NetworkRequirement::default(),
        )
    }

    #[tokio::test]
    async fn connect_without_wallet_fails() {
        let manager = SessionManager::new(None, NetworkRequirement::default());
        assert_eq!(manager.connect().await, Err(Error::WalletNotInstalled));
        assert!(manager.subscribe().is_err());
    }

    #[tokio::test]
    async fn connect_uses_first_account() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 31337));
        let session = manager(&wallet).connect().await.unwrap();
        assert_eq!(
            session,
            Session { address: ALICE, chain_id: U256::from(31337), connected: true }
        );
    }

    #[tokio::test]
    async fn connect_rejected_by_user() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 31337));
        wallet.reject_accounts();
        assert_eq!(manager(&wallet).connect().await, Err(Error::UserRejected));
    }

    #[tokio::test]
    async fn connect_with_no_accounts_fails() {
        let wallet = Arc::new(MockWallet::new(vec![], 31337));
        assert!(matches!(
            manager(&wallet).connect().await,
            Err(Error::RpcFailure(_))
        ));
    }

    #[tokio::test]
    async fn ensure_network_skips_switch_on_required_chain() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 31337));
        let chain_id = manager(&wallet).ensure_network().await.unwrap();
        assert_eq!(chain_id, U256::from(31337));
        assert_eq!(wallet.calls(), vec!["eth_chainId"]);
    }

    #[tokio::test]
    async fn ensure_network_switches_chain() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 1));
        let chain_id = manager(&wallet).ensure_network().await.unwrap();
        assert_eq!(chain_id, U256::from(31337));
        assert_eq!(
            wallet.calls(),
            vec!["eth_chainId", "wallet_switchEthereumChain", "eth_chainId"]
        );
    }

    #[tokio::test]
    async fn ensure_network_reports_switch_failure() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 1));
        wallet.fail_switch(ProviderError::new("Unrecognized chain ID"));
        assert_eq!(
            manager(&wallet).ensure_network().await,
            Err(Error::NetworkSwitchFailed("Unrecognized chain ID".to_owned()))
        );
    }

    #[tokio::test]
    async fn ensure_network_detects_ignored_switch() {
        let wallet = Arc::new(MockWallet::new(vec![ALICE], 1));
        wallet.ignore_switch();
        assert_eq!(
            manager(&wallet).ensure_network().await,
            Err(Error::NetworkMismatch {
                expected: U256::from(31337),
                actual: U256::from(1),
            })
        );
    }
}
