//! In-memory wallet and token doubles.
//!
//! Both record the calls they receive so tests can assert on what the session
//! core asked for, and both can be told to fail or stall.
use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{address, keccak256, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use crate::{
    contract::{LogRecord, Receipt, ReceiptStatus, TokenContract},
    wallet::{
        to_hex_quantity, ChainId, ProviderError, ProviderErrorData,
        WalletEvent, WalletEvents, WalletProvider, WalletRequest,
    },
};

/// Address the in-memory token claims to be deployed at.
pub const TOKEN_ADDRESS: Address =
    address!("5FbDB2315678afecb367f032d93F642f64180aa3");

/// Installs a test-friendly `tracing` subscriber honouring `RUST_LOG`.
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered log of method names a double was called with.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn record(&self, method: &str) {
        self.0.lock().push(method.to_owned());
    }

    /// Recorded calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Clone)]
enum SwitchBehavior {
    Accept,
    Fail(ProviderError),
    Ignore,
}

#[derive(Debug)]
struct WalletInner {
    accounts: Vec<Address>,
    chain_id: ChainId,
    reject_accounts: bool,
    switch: SwitchBehavior,
    subscribers: Vec<mpsc::UnboundedSender<WalletEvent>>,
    subscriptions: usize,
}

impl WalletInner {
    fn broadcast(&mut self, event: &WalletEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A scriptable browser wallet.
///
/// Accepted chain switches behave like a real wallet: the chain changes and a
/// `chainChanged` notification follows.
#[derive(Debug)]
pub struct MockWallet {
    inner: Mutex<WalletInner>,
    log: CallLog,
}

impl MockWallet {
    /// A wallet exposing `accounts` on chain `chain_id`.
    #[must_use]
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            inner: Mutex::new(WalletInner {
                accounts,
                chain_id: U256::from(chain_id),
                reject_accounts: false,
                switch: SwitchBehavior::Accept,
                subscribers: Vec::new(),
                subscriptions: 0,
            }),
            log: CallLog::default(),
        }
    }

    /// Makes the user decline every account request.
    pub fn reject_accounts(&self) {
        self.inner.lock().reject_accounts = true;
    }

    /// Makes every chain switch fail with `err`.
    pub fn fail_switch(&self, err: ProviderError) {
        self.inner.lock().switch = SwitchBehavior::Fail(err);
    }

    /// Makes chain switches succeed without changing the chain.
    pub fn ignore_switch(&self) {
        self.inner.lock().switch = SwitchBehavior::Ignore;
    }

    /// Makes chain switches succeed again.
    pub fn accept_switch(&self) {
        self.inner.lock().switch = SwitchBehavior::Accept;
    }

    /// Changes the exposed accounts and notifies subscribers.
    pub fn emit_accounts_changed(&self, accounts: Vec<Address>) {
        let mut inner = self.inner.lock();
        inner.accounts.clone_from(&accounts);
        inner.broadcast(&WalletEvent::AccountsChanged(accounts));
    }

    /// Moves the wallet to `chain_id` and notifies subscribers.
    pub fn emit_chain_changed(&self, chain_id: u64) {
        let chain_id = U256::from(chain_id);
        let mut inner = self.inner.lock();
        inner.chain_id = chain_id;
        inner.broadcast(&WalletEvent::ChainChanged(chain_id));
    }

    /// Chain the wallet is on.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.inner.lock().chain_id
    }

    /// RPC methods requested so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    /// Number of times [`WalletProvider::subscribe`] was called.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.inner.lock().subscriptions
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request(
        &self,
        request: WalletRequest,
    ) -> Result<Value, ProviderError> {
        self.log.record(request.method());
        let mut inner = self.inner.lock();
        match request {
            WalletRequest::RequestAccounts if inner.reject_accounts => {
                Err(ProviderError::user_rejected())
            }
            WalletRequest::RequestAccounts => Ok(json!(inner.accounts)),
            WalletRequest::ChainId => Ok(json!(to_hex_quantity(inner.chain_id))),
            WalletRequest::SwitchChain { chain_id } => match inner.switch.clone() {
                SwitchBehavior::Accept => {
                    inner.chain_id = chain_id;
                    inner.broadcast(&WalletEvent::ChainChanged(chain_id));
                    Ok(Value::Null)
                }
                SwitchBehavior::Fail(err) => Err(err),
                SwitchBehavior::Ignore => Ok(Value::Null),
            },
        }
    }

    fn subscribe(&self) -> WalletEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.subscribers.push(tx);
        inner.subscriptions += 1;
        rx
    }
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    receipts: HashMap<TxHash, Receipt>,
    nonce: u64,
    fail_reads: bool,
    reject_next: Option<ProviderError>,
    revert_next: bool,
}

/// An ERC-20 ledger in memory, named "My Hardhat Token" (`MHT`).
///
/// Transfers move balances immediately and emit a `Transfer` log. Reads and
/// receipts can be held back to simulate a slow node.
#[derive(Debug)]
pub struct InMemoryToken {
    total_supply: U256,
    ledger: Mutex<Ledger>,
    reads_held: watch::Sender<bool>,
    receipts_held: watch::Sender<bool>,
    log: CallLog,
}

impl InMemoryToken {
    /// Deploys a token minting `supply` to `owner`.
    #[must_use]
    pub fn new(owner: Address, supply: U256) -> Self {
        let mut ledger = Ledger::default();
        ledger.balances.insert(owner, supply);
        Self {
            total_supply: supply,
            ledger: Mutex::new(ledger),
            reads_held: watch::Sender::new(false),
            receipts_held: watch::Sender::new(false),
            log: CallLog::default(),
        }
    }

    /// Tokens minted at deployment.
    #[must_use]
    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    /// Balance of `account`.
    #[must_use]
    pub fn balance(&self, account: Address) -> U256 {
        self.ledger.lock().balances.get(&account).copied().unwrap_or_default()
    }

    /// Overwrites the balance of `account`.
    pub fn set_balance(&self, account: Address, balance: U256) {
        self.ledger.lock().balances.insert(account, balance);
    }

    /// Makes every read fail while `fail` is set.
    pub fn fail_reads(&self, fail: bool) {
        self.ledger.lock().fail_reads = fail;
    }

    /// Stalls reads until `hold_reads(false)`.
    pub fn hold_reads(&self, hold: bool) {
        self.reads_held.send_replace(hold);
    }

    /// Stalls receipt waits until `hold_receipts(false)`.
    pub fn hold_receipts(&self, hold: bool) {
        self.receipts_held.send_replace(hold);
    }

    /// Makes the next transfer submission fail with `err`.
    pub fn reject_next_transfer(&self, err: ProviderError) {
        self.ledger.lock().reject_next = Some(err);
    }

    /// Makes the next transfer get included with a reverted status.
    pub fn revert_next_transfer(&self) {
        self.ledger.lock().revert_next = true;
    }

    /// Contract methods called so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.log.clear();
    }

    async fn read(&self, method: &str) -> Result<(), ProviderError> {
        self.log.record(method);
        wait_released(&self.reads_held).await;
        if self.ledger.lock().fail_reads {
            return Err(ProviderError::new("connection refused"));
        }
        Ok(())
    }
}

async fn wait_released(held: &watch::Sender<bool>) {
    let mut rx = held.subscribe();
    let _ = rx.wait_for(|held| !held).await;
}

fn insufficient_balance() -> ProviderError {
    ProviderError {
        code: Some(-32603),
        message: "execution reverted".to_owned(),
        data: Some(ProviderErrorData {
            message: Some("Not enough tokens".to_owned()),
        }),
    }
}

fn transfer_log(from: Address, to: Address, amount: U256) -> LogRecord {
    LogRecord {
        address: TOKEN_ADDRESS,
        topics: vec![
            keccak256("Transfer(address,address,uint256)"),
            from.into_word(),
            to.into_word(),
        ],
        data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
    }
}

#[async_trait]
impl TokenContract for InMemoryToken {
    async fn name(&self) -> Result<String, ProviderError> {
        self.read("name").await?;
        Ok("My Hardhat Token".to_owned())
    }

    async fn symbol(&self) -> Result<String, ProviderError> {
        self.read("symbol").await?;
        Ok("MHT".to_owned())
    }

    async fn balance_of(&self, account: Address) -> Result<U256, ProviderError> {
        self.read("balanceOf").await?;
        Ok(self.balance(account))
    }

    async fn transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<TxHash, ProviderError> {
        self.log.record("transfer");
        let mut ledger = self.ledger.lock();
        if let Some(err) = ledger.reject_next.take() {
            return Err(err);
        }

        let available = ledger.balances.get(&from).copied().unwrap_or_default();
        if available < amount {
            return Err(insufficient_balance());
        }

        ledger.nonce += 1;
        let hash = keccak256(ledger.nonce.to_be_bytes());
        let receipt = if std::mem::take(&mut ledger.revert_next) {
            Receipt {
                transaction_hash: hash,
                status: ReceiptStatus::Reverted,
                logs: vec![],
            }
        } else {
            ledger.balances.insert(from, available - amount);
            *ledger.balances.entry(to).or_default() += amount;
            Receipt {
                transaction_hash: hash,
                status: ReceiptStatus::Success,
                logs: vec![transfer_log(from, to, amount)],
            }
        };
        ledger.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Receipt, ProviderError> {
        self.log.record("waitForReceipt");
        wait_released(&self.receipts_held).await;
        self.ledger
            .lock()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| ProviderError::new(format!("unknown transaction {hash}")))
    }
}
