//! JSON-RPC backed implementations of the wallet and contract capabilities.
use alloy::{
    network::ReceiptResponse,
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder},
    rpc::types::eth::TransactionReceipt,
    transports::TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::{
    abi::AddressRegistry,
    config::DappConfig,
    contract::{LogRecord, Receipt, ReceiptStatus, TokenContract},
    wallet::{
        to_hex_quantity, ProviderError, ProviderErrorData, WalletEvent,
        WalletEvents, WalletProvider, WalletRequest,
    },
};

mod bindings {
    #![allow(missing_docs, unreachable_pub, clippy::pedantic)]
    alloy::sol! {
        #[sol(rpc)]
        contract Token {
            event Transfer(address indexed _from, address indexed _to, uint256 _value);

            function name() external view returns (string memory);
            function symbol() external view returns (string memory);
            function balanceOf(address account) external view returns (uint256);
            function transfer(address to, uint256 amount) external;
        }
    }
}

use bindings::Token;

/// The token, reached through an alloy provider.
pub struct RpcToken<P> {
    contract: Token::TokenInstance<P>,
}

impl<P: Provider> RpcToken<P> {
    /// Binds the token deployed at `address`.
    pub fn new(address: Address, provider: P) -> Self {
        Self { contract: Token::new(address, provider) }
    }

    /// Address of the bound token.
    pub fn address(&self) -> Address {
        *self.contract.address()
    }
}

impl RpcToken<DynProvider> {
    /// Binds the token at `address` over HTTP.
    #[must_use]
    pub fn connect_http(rpc_url: Url, address: Address) -> Self {
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
        Self::new(address, provider)
    }

    /// Binds the token recorded in `registry` under the configured key, on
    /// the configured endpoint.
    ///
    /// # Errors
    ///
    /// May fail if the registry has no entry for the key.
    pub fn from_registry(
        config: &DappConfig,
        registry: &AddressRegistry,
    ) -> eyre::Result<Self> {
        let address = registry.address(&config.registry_key)?;
        Ok(Self::connect_http(config.network.rpc_endpoint.clone(), address))
    }
}

#[async_trait]
impl<P: Provider> TokenContract for RpcToken<P> {
    async fn name(&self) -> Result<String, ProviderError> {
        self.contract.name().call().await.map_err(|e| contract_error(&e))
    }

    async fn symbol(&self) -> Result<String, ProviderError> {
        self.contract.symbol().call().await.map_err(|e| contract_error(&e))
    }

    async fn balance_of(&self, account: Address) -> Result<U256, ProviderError> {
        self.contract
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| contract_error(&e))
    }

    async fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ProviderError> {
        let pending = self
            .contract
            .transfer(to, amount)
            .from(from)
            .send()
            .await
            .map_err(|e| contract_error(&e))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Receipt, ProviderError> {
        let root = self.contract.provider().root().clone();
        let receipt = PendingTransactionBuilder::new(root, hash)
            .get_receipt()
            .await
            .map_err(|e| ProviderError::new(e.to_string()))?;
        Ok(to_receipt(&receipt))
    }
}

fn to_receipt(receipt: &TransactionReceipt) -> Receipt {
    let status = if receipt.status() {
        ReceiptStatus::Success
    } else {
        ReceiptStatus::Reverted
    };
    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| LogRecord {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
        })
        .collect();

    Receipt { transaction_hash: receipt.transaction_hash, status, logs }
}

fn contract_error(err: &alloy::contract::Error) -> ProviderError {
    match err {
        alloy::contract::Error::TransportError(e) => transport_error(e),
        other => ProviderError::new(other.to_string()),
    }
}

/// Keeps the node's `{ code, message, data }` payload when there is one.
fn transport_error(err: &TransportError) -> ProviderError {
    let Some(payload) = err.as_error_resp() else {
        return ProviderError::new(err.to_string());
    };

    ProviderError {
        code: Some(payload.code),
        message: payload.message.to_string(),
        data: payload.try_data_as::<ProviderErrorData>().and_then(Result::ok),
    }
}

/// A wallet backed by a node with unlocked accounts, such as a local
/// development chain.
///
/// Nodes don't push wallet notifications; [`RpcWallet::notify`] forwards
/// them to subscribers instead.
pub struct RpcWallet<P> {
    provider: P,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WalletEvent>>>,
}

impl<P: Provider> RpcWallet<P> {
    /// Wraps `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider, subscribers: Mutex::new(Vec::new()) }
    }

    /// Delivers `event` to every open subscription.
    pub fn notify(&self, event: &WalletEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl RpcWallet<DynProvider> {
    /// Connects to the node at `rpc_url`.
    #[must_use]
    pub fn connect_http(rpc_url: Url) -> Self {
        Self::new(ProviderBuilder::new().connect_http(rpc_url).erased())
    }
}

#[async_trait]
impl<P: Provider> WalletProvider for RpcWallet<P> {
    async fn request(
        &self,
        request: WalletRequest,
    ) -> Result<Value, ProviderError> {
        let result = match &request {
            WalletRequest::RequestAccounts => {
                self.provider.get_accounts().await.map(|accounts| json!(accounts))
            }
            WalletRequest::ChainId => self
                .provider
                .get_chain_id()
                .await
                .map(|id| json!(to_hex_quantity(U256::from(id)))),
            WalletRequest::SwitchChain { .. } => {
                self.provider
                    .raw_request::<_, Value>(request.method().into(), request.params())
                    .await
            }
        };

        result.map_err(|e| {
            tracing::debug!(method = request.method(), %e, "wallet request failed");
            transport_error(&e)
        })
    }

    fn subscribe(&self) -> WalletEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}
