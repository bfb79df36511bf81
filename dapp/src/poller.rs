//! Periodic refresh of the token snapshot for the active account.
use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use serde::Serialize;
use tokio::{
    sync::Notify,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::contract::{TokenContract, TokenMetadata};

/// Token data shown for the active account. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSnapshot {
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Balance of the active account.
    pub balance: U256,
}

/// A scoped, cancellable refresh task.
///
/// The first refresh runs immediately, then one per interval. Every read runs
/// on its own, so a slow read never delays the next tick and the
/// later-completing read wins. Failed reads are logged and skipped.
///
/// Dropping the poller stops it.
#[derive(Debug)]
pub struct BalancePoller {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl BalancePoller {
    /// Starts polling `account`'s balance. `metadata` is the cached name and
    /// symbol; `sink` receives every fresh snapshot.
    pub fn start<F>(
        contract: Arc<dyn TokenContract>,
        account: Address,
        metadata: TokenMetadata,
        interval: Duration,
        sink: F,
    ) -> Self
    where
        F: Fn(TokenSnapshot) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            Reader {
                contract,
                account,
                metadata,
                cancel: cancel.clone(),
                sink: Arc::new(sink),
            },
            interval,
            refresh.clone(),
        ));

        tracing::debug!(%account, ?interval, "balance polling started");
        Self { cancel, refresh, task: Some(task) }
    }

    /// Requests an out-of-cycle refresh.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Stops polling. Reads still in flight are discarded. Calling it again
    /// is a no-op.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        task.abort();
        tracing::debug!("balance polling stopped");
    }

    /// Whether the poller has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for BalancePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Reader {
    contract: Arc<dyn TokenContract>,
    account: Address,
    metadata: TokenMetadata,
    cancel: CancellationToken,
    sink: Arc<dyn Fn(TokenSnapshot) + Send + Sync>,
}

impl Reader {
    fn spawn_read(&self, reads: &mut JoinSet<()>) {
        let contract = self.contract.clone();
        let account = self.account;
        let metadata = self.metadata.clone();
        let cancel = self.cancel.clone();
        let sink = self.sink.clone();

        reads.spawn(async move {
            match contract.balance_of(account).await {
                // A read that lands after `stop` belongs to a dead session.
                Ok(_) if cancel.is_cancelled() => {}
                Ok(balance) => sink(TokenSnapshot {
                    name: metadata.name,
                    symbol: metadata.symbol,
                    balance,
                }),
                Err(err) => {
                    tracing::warn!(%account, %err, "balance refresh failed");
                }
            }
        });
    }
}

async fn run(reader: Reader, interval: Duration, refresh: Arc<Notify>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Aborts outstanding reads when the loop exits.
    let mut reads = JoinSet::new();

    loop {
        tokio::select! {
            () = reader.cancel.cancelled() => break,
            _ = ticker.tick() => reader.spawn_read(&mut reads),
            () = refresh.notified() => reader.spawn_read(&mut reads),
            Some(_) = reads.join_next(), if !reads.is_empty() => {}
        }
    }
}
