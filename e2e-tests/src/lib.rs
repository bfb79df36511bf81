//! End-to-end scenarios: the session controller driving transfers against an
//! in-memory ledger, with emitted events checked through the token ABI.
use std::sync::Arc;

use alloy_primitives::{address, Address, U256};
use eyre::{ensure, Result};
use token_dapp::{
    config::DEFAULT_CHAIN_ID,
    test_utils::{InMemoryToken, MockWallet, TOKEN_ADDRESS},
    AddressRegistry, Artifact, DappConfig, EventSpec, Phase, SessionController,
    SessionState, WalletProvider,
};

#[cfg(test)]
mod token;

/// Compiled token artifact.
pub const TOKEN_ARTIFACT: &str = include_str!("../artifacts/Token.json");
/// Address registry written by the deployment module.
pub const DEPLOYED_ADDRESSES: &str =
    include_str!("../artifacts/deployed_addresses.json");

/// First development account; deploys the token.
pub const OWNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
/// Second development account.
pub const ADDR1: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
/// Third development account.
pub const ADDR2: Address = address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");
/// Supply minted to [`OWNER`].
pub const TOTAL_SUPPLY: u64 = 1_000_000;

/// A freshly deployed token with a wallet holding the three development
/// accounts, [`OWNER`] selected.
pub struct TokenFixture {
    /// The ledger.
    pub token: Arc<InMemoryToken>,
    /// The wallet.
    pub wallet: Arc<MockWallet>,
    /// Controller wired to both.
    pub controller: SessionController,
    /// Token address from the registry.
    pub address: Address,
    /// `Transfer` as declared in the token ABI.
    pub transfer: EventSpec,
}

/// Deploys the token and spawns a controller on the current runtime.
///
/// # Errors
///
/// May fail if the artifacts are unreadable or disagree with the ledger.
pub fn deploy_token_fixture() -> Result<TokenFixture> {
    let artifact = Artifact::from_json(TOKEN_ARTIFACT)?;
    let transfer = e2e::event_spec(&artifact, "Transfer")?;

    let config = DappConfig::default();
    let address = AddressRegistry::from_json(DEPLOYED_ADDRESSES)?
        .address(&config.registry_key)?;
    ensure!(
        address == TOKEN_ADDRESS,
        "registry points at {address}, ledger lives at {TOKEN_ADDRESS}"
    );

    let token = Arc::new(InMemoryToken::new(OWNER, U256::from(TOTAL_SUPPLY)));
    let wallet =
        Arc::new(MockWallet::new(vec![OWNER, ADDR1, ADDR2], DEFAULT_CHAIN_ID));
    let controller = SessionController::spawn(
        config,
        Some(wallet.clone() as Arc<dyn WalletProvider>),
        token.clone(),
    );

    Ok(TokenFixture { token, wallet, controller, address, transfer })
}

impl TokenFixture {
    /// Waits for the first state satisfying `condition`.
    ///
    /// # Errors
    ///
    /// May fail if the controller stops first.
    pub async fn wait_for(
        &self,
        condition: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.controller.subscribe();
        let state = rx.wait_for(condition).await?.clone();
        Ok(state)
    }

    /// Selects `account` in the wallet and waits until its token data is
    /// loaded.
    ///
    /// # Errors
    ///
    /// May fail if the controller stops first.
    pub async fn switch_account(&self, account: Address) -> Result<SessionState> {
        self.wallet.emit_accounts_changed(vec![account]);
        self.wait_for(|state| {
            state.phase == Phase::Ready
                && state.token.is_some()
                && state.session.as_ref().is_some_and(|s| s.address == account)
        })
        .await
    }
}
