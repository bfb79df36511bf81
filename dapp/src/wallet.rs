//! Wallet capability consumed by the session core.
//!
//! Mirrors the EIP-1193 surface a browser wallet injects: a request/response
//! RPC and notifications for account and chain changes.
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Chain identifier. Kept arbitrary-precision, the same as token amounts.
pub type ChainId = U256;

/// Stream of wallet notifications returned by [`WalletProvider::subscribe`].
pub type WalletEvents = mpsc::UnboundedReceiver<WalletEvent>;

/// EIP-1193 error code for "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Requests the session core issues to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletRequest {
    /// `eth_requestAccounts`.
    RequestAccounts,
    /// `eth_chainId`.
    ChainId,
    /// `wallet_switchEthereumChain`.
    SwitchChain {
        /// Chain the wallet should move to.
        chain_id: ChainId,
    },
}

impl WalletRequest {
    /// JSON-RPC method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::RequestAccounts => "eth_requestAccounts",
            Self::ChainId => "eth_chainId",
            Self::SwitchChain { .. } => "wallet_switchEthereumChain",
        }
    }

    /// JSON-RPC params.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Self::RequestAccounts | Self::ChainId => json!([]),
            Self::SwitchChain { chain_id } => {
                json!([{ "chainId": to_hex_quantity(*chain_id) }])
            }
        }
    }
}

/// Notifications pushed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// `accountsChanged`. An empty list means the user disconnected.
    AccountsChanged(Vec<Address>),
    /// `chainChanged`.
    ChainChanged(ChainId),
}

/// Structured part of a provider error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderErrorData {
    /// Reason supplied by the node, e.g. a revert string.
    #[serde(default)]
    pub message: Option<String>,
}

/// An error returned by the wallet or the node behind it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", self.reason())]
pub struct ProviderError {
    /// Numeric error code, when the provider reported one.
    #[serde(default)]
    pub code: Option<i64>,
    /// Generic message.
    pub message: String,
    /// Structured data.
    #[serde(default)]
    pub data: Option<ProviderErrorData>,
}

impl ProviderError {
    /// An error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into(), data: None }
    }

    /// The error a wallet returns when its user declines a prompt.
    #[must_use]
    pub fn user_rejected() -> Self {
        Self {
            code: Some(USER_REJECTED_CODE),
            message: "User rejected the request.".to_owned(),
            data: None,
        }
    }

    /// Whether the user declined the request.
    #[must_use]
    pub fn is_user_rejection(&self) -> bool {
        self.code == Some(USER_REJECTED_CODE)
    }

    /// Most specific message available: `data.message` over `message`.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|data| data.message.as_deref())
            .unwrap_or(&self.message)
    }
}

/// The wallet capability.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Issue `request` and return the raw JSON result.
    async fn request(
        &self,
        request: WalletRequest,
    ) -> Result<Value, ProviderError>;

    /// Open a stream of `accountsChanged` / `chainChanged` notifications.
    fn subscribe(&self) -> WalletEvents;
}

/// Formats `value` as an Ethereum hex quantity, e.g. `0x7a69`.
#[must_use]
pub fn to_hex_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

/// Parses an Ethereum hex quantity such as `0x7a69`.
///
/// # Errors
///
/// Fails if `value` is not valid hex.
pub fn parse_hex_quantity(value: &str) -> Result<U256, ProviderError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    U256::from_str_radix(digits, 16).map_err(|err| {
        ProviderError::new(format!("invalid hex quantity `{value}`: {err}"))
    })
}
