//! Token contract capability and the receipt types it returns.
use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::wallet::ProviderError;

/// Reads and writes against the deployed token.
///
/// Implementations are derived from the token ABI and its deployed address,
/// see [`crate::rpc::RpcToken`].
#[async_trait]
pub trait TokenContract: Send + Sync {
    /// `name()`.
    async fn name(&self) -> Result<String, ProviderError>;

    /// `symbol()`.
    async fn symbol(&self) -> Result<String, ProviderError>;

    /// `balanceOf(account)`.
    async fn balance_of(&self, account: Address) -> Result<U256, ProviderError>;

    /// Submits `transfer(to, amount)` on behalf of `from` and returns the
    /// transaction hash without waiting for inclusion.
    async fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ProviderError>;

    /// Waits until `hash` is included and returns its receipt.
    async fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Receipt, ProviderError>;
}

/// Token name and symbol, read once per initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
}

/// Execution status reported by a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// The transaction executed.
    Success,
    /// The transaction was included but reverted.
    Reverted,
}

/// A log emitted by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Contract that emitted the log.
    pub address: Address,
    /// Topic 0 is the event signature hash, the rest are indexed arguments.
    pub topics: Vec<B256>,
    /// Non-indexed arguments, ABI-encoded.
    pub data: Bytes,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction.
    pub transaction_hash: TxHash,
    /// Execution status.
    pub status: ReceiptStatus,
    /// Emitted logs, in order.
    pub logs: Vec<LogRecord>,
}

impl Receipt {
    /// Whether the receipt reports a revert.
    #[must_use]
    pub fn reverted(&self) -> bool {
        self.status == ReceiptStatus::Reverted
    }
}
