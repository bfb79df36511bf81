//! Error taxonomy of the session core.
use alloy_primitives::U256;

use crate::wallet::ProviderError;

/// Result alias used across the session core.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Failures surfaced by the session core.
///
/// The variants are `Clone` so the controller can keep the latest one of each
/// kind on its error surfaces.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No wallet capability was injected.
    #[error("no wallet detected; install a browser wallet to continue")]
    WalletNotInstalled,
    /// The user declined the request in their wallet (EIP-1193 code `4001`).
    #[error("user rejected the request")]
    UserRejected,
    /// The wallet is still on another chain after a switch was accepted.
    #[error("wallet is on chain {actual}, expected chain {expected}")]
    NetworkMismatch {
        /// Required chain id.
        expected: U256,
        /// Chain id reported by the wallet.
        actual: U256,
    },
    /// `wallet_switchEthereumChain` failed.
    #[error("failed to switch network: {0}")]
    NetworkSwitchFailed(String),
    /// The transaction was included but its receipt reports a revert.
    #[error("transaction reverted: {}", .0.as_deref().unwrap_or("Transaction failed"))]
    TransactionReverted(Option<String>),
    /// Any other wallet or RPC failure.
    #[error("{0}")]
    RpcFailure(String),
    /// A transfer was requested without a `Ready` session.
    #[error("session is not ready")]
    SessionNotReady,
    /// A transfer was requested while another one is still in flight.
    #[error("a transaction is already pending")]
    TransferInFlight,
    /// The controller task is no longer running.
    #[error("session controller has shut down")]
    ControllerClosed,
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        if err.is_user_rejection() {
            Self::UserRejected
        } else {
            Self::RpcFailure(err.reason().to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::ProviderErrorData;

    #[test]
    fn user_rejection_maps_to_its_own_variant() {
        let err = ProviderError::user_rejected();
        assert_eq!(Error::from(err), Error::UserRejected);
    }

    #[test]
    fn rpc_failure_prefers_structured_reason() {
        let err = ProviderError {
            code: Some(-32603),
            message: "Internal JSON-RPC error.".to_owned(),
            data: Some(ProviderErrorData {
                message: Some("Not enough tokens".to_owned()),
            }),
        };
        assert_eq!(
            Error::from(err),
            Error::RpcFailure("Not enough tokens".to_owned())
        );
    }

    #[test]
    fn revert_without_reason_uses_generic_message() {
        assert_eq!(
            Error::TransactionReverted(None).to_string(),
            "transaction reverted: Transaction failed"
        );
    }
}
