//! Transfer submission and outcome classification.
use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    contract::{Receipt, TokenContract},
    error::Error,
    wallet::ProviderError,
};

/// A submitted transfer that has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTransaction {
    /// Transaction hash returned by the wallet.
    pub hash: TxHash,
    /// When the wallet accepted the transaction.
    pub submitted_at: DateTime<Utc>,
}

/// How a transfer ended. Produced exactly once per transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Included and executed.
    Success(Receipt),
    /// Included but reverted, with the reason when one is known.
    Reverted(Option<String>),
    /// The user declined to sign.
    UserRejected,
    /// Submission or the receipt wait failed.
    Failed(String),
}

impl TransactionOutcome {
    /// The error to show for this outcome, if any. User rejections are
    /// expected behaviour and map to `None`.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::Success(_) | Self::UserRejected => None,
            Self::Reverted(reason) => Some(Error::TransactionReverted(reason.clone())),
            Self::Failed(message) => Some(Error::RpcFailure(message.clone())),
        }
    }

    fn from_submission_error(err: &ProviderError) -> Self {
        if err.is_user_rejection() {
            Self::UserRejected
        } else {
            Self::Failed(err.reason().to_owned())
        }
    }
}

/// Submits transfers and classifies how they end.
///
/// Holds no transaction state of its own: the pending marker is handed to the
/// caller through `on_submitted` and the one-in-flight rule is enforced by the
/// controller.
#[derive(Clone)]
pub struct TransactionCoordinator {
    contract: Arc<dyn TokenContract>,
}

impl TransactionCoordinator {
    /// Creates a coordinator for `contract`.
    #[must_use]
    pub fn new(contract: Arc<dyn TokenContract>) -> Self {
        Self { contract }
    }

    /// Transfers `amount` tokens from `from` to `to` and waits for the
    /// receipt. `on_submitted` is called once the wallet returned a hash.
    pub async fn transfer<F>(
        &self,
        from: Address,
        to: Address,
        amount: U256,
        on_submitted: F,
    ) -> TransactionOutcome
    where
        F: FnOnce(PendingTransaction),
    {
        let hash = match self.contract.transfer(from, to, amount).await {
            Ok(hash) => hash,
            Err(err) => {
                let outcome = TransactionOutcome::from_submission_error(&err);
                if outcome == TransactionOutcome::UserRejected {
                    tracing::debug!("transfer rejected by user");
                } else {
                    tracing::error!(%err, "transfer submission failed");
                }
                return outcome;
            }
        };

        tracing::info!(%hash, %to, %amount, "transfer submitted");
        on_submitted(PendingTransaction { hash, submitted_at: Utc::now() });

        match self.contract.wait_for_receipt(hash).await {
            Ok(receipt) if receipt.reverted() => {
                tracing::warn!(%hash, "transfer reverted");
                TransactionOutcome::Reverted(None)
            }
            Ok(receipt) => {
                tracing::info!(%hash, "transfer confirmed");
                TransactionOutcome::Success(receipt)
            }
            Err(err) => {
                tracing::error!(%hash, %err, "waiting for receipt failed");
                TransactionOutcome::Failed(err.reason().to_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::{contract::ReceiptStatus, test_utils::InMemoryToken};

    const ALICE: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const BOB: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

    fn coordinator(token: &Arc<InMemoryToken>) -> TransactionCoordinator {
        TransactionCoordinator::new(token.clone())
    }

    #[tokio::test]
    async fn successful_transfer_reports_receipt() {
        let token = Arc::new(InMemoryToken::new(ALICE, U256::from(100)));
        let mut submitted = None;
        let outcome = coordinator(&token)
            .transfer(ALICE, BOB, U256::from(40), |pending| submitted = Some(pending))
            .await;

        let TransactionOutcome::Success(receipt) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(Some(receipt.transaction_hash), submitted.map(|p| p.hash));
        assert_eq!(token.balance(BOB), U256::from(40));
    }

    #[tokio::test]
    async fn user_rejection_is_not_an_error() {
        let token = Arc::new(InMemoryToken::new(ALICE, U256::from(100)));
        token.reject_next_transfer(ProviderError::user_rejected());
        let mut submitted = false;
        let outcome = coordinator(&token)
            .transfer(ALICE, BOB, U256::from(1), |_| submitted = true)
            .await;

        assert_eq!(outcome, TransactionOutcome::UserRejected);
        assert_eq!(outcome.error(), None);
        assert!(!submitted);
    }

    #[tokio::test]
    async fn revert_is_classified() {
        let token = Arc::new(InMemoryToken::new(ALICE, U256::from(100)));
        token.revert_next_transfer();
        let outcome = coordinator(&token)
            .transfer(ALICE, BOB, U256::from(1), |_| {})
            .await;

        assert_eq!(outcome, TransactionOutcome::Reverted(None));
        assert_eq!(outcome.error(), Some(Error::TransactionReverted(None)));
        assert_eq!(token.balance(ALICE), U256::from(100));
    }

    #[tokio::test]
    async fn failure_carries_the_structured_reason() {
        let token = Arc::new(InMemoryToken::new(ALICE, U256::from(1)));
        let outcome = coordinator(&token)
            .transfer(ALICE, BOB, U256::from(2), |_| {})
            .await;

        assert_eq!(outcome, TransactionOutcome::Failed("Not enough tokens".to_owned()));
    }
}
