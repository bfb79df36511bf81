//! The session state machine and its handle.
//!
//! A single task owns [`SessionState`]. User actions arrive as commands,
//! wallet notifications through the subscription, and every RPC runs in a
//! spawned task that reports back as a completion. Completions are tagged
//! with the epoch they were started in; the epoch moves on whenever the
//! session is replaced, re-validated or torn down, and stale completions are
//! dropped. All updates are whole-value assignments.
//!
//! The presentation layer reads state through [`SessionController::subscribe`].
use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    config::DappConfig,
    contract::{TokenContract, TokenMetadata},
    error::{Error, Result},
    poller::{BalancePoller, TokenSnapshot},
    session::{Phase, Session, SessionManager},
    transaction::{PendingTransaction, TransactionCoordinator, TransactionOutcome},
    wallet::{ChainId, WalletEvent, WalletEvents, WalletProvider},
};

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Lifecycle phase.
    pub phase: Phase,
    /// Connected account, if any.
    pub session: Option<Session>,
    /// Token data for the connected account, once loaded.
    pub token: Option<TokenSnapshot>,
    /// Transfer waiting for its receipt.
    pub pending: Option<PendingTransaction>,
    /// Latest connection or initialization failure.
    #[serde(serialize_with = "serialize_error")]
    pub network_error: Option<Error>,
    /// Latest transfer failure.
    #[serde(serialize_with = "serialize_error")]
    pub transaction_error: Option<Error>,
}

impl SessionState {
    /// The token symbol to offer a transfer in. `None` while the balance is
    /// zero or unknown.
    #[must_use]
    pub fn transfer_offer(&self) -> Option<&str> {
        self.token
            .as_ref()
            .filter(|token| token.balance > U256::ZERO)
            .map(|token| token.symbol.as_str())
    }

    /// Whether the connected account holds no tokens.
    #[must_use]
    pub fn has_no_tokens(&self) -> bool {
        self.token.as_ref().is_some_and(|token| token.balance.is_zero())
    }

    /// Whether the session is up but token data hasn't arrived yet.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.session.is_some() && self.token.is_none()
    }
}

#[allow(clippy::ref_option)]
fn serialize_error<S: serde::Serializer>(
    error: &Option<Error>,
    serializer: S,
) -> core::result::Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Transfer {
        to: Address,
        amount: U256,
        reply: oneshot::Sender<Result<TransactionOutcome>>,
    },
    Disconnect,
    DismissNetworkError,
    DismissTransactionError,
}

enum Completion {
    Connected { epoch: u64, result: Result<Session> },
    NetworkChecked { epoch: u64, result: Result<ChainId> },
    Initialized { epoch: u64, result: Result<TokenSnapshot> },
    Snapshot { epoch: u64, snapshot: TokenSnapshot },
    Submitted { id: u64, pending: PendingTransaction },
    Resolved { id: u64, outcome: TransactionOutcome },
}

enum Step {
    Command(Command),
    Wallet(Option<WalletEvent>),
    Completion(Completion),
}

/// Handle to a running session state machine.
///
/// Cheap to clone. The state machine stops, releasing its poller, once every
/// handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionController {
    /// Starts the state machine on the current tokio runtime.
    ///
    /// `wallet` is `None` when no wallet is installed; `connect` then fails
    /// with [`Error::WalletNotInstalled`].
    #[must_use]
    pub fn spawn(
        config: DappConfig,
        wallet: Option<Arc<dyn WalletProvider>>,
        contract: Arc<dyn TokenContract>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (view, state) = watch::channel(SessionState::default());

        let machine = Machine::new(config, wallet, contract, view, completions);
        tokio::spawn(machine.run(command_rx, completion_rx));

        Self { commands, state }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ControllerClosed)
    }

    /// Connects the wallet, or re-validates the network of an existing
    /// session. Resolves once the session is `Ready` with token data.
    ///
    /// # Errors
    ///
    /// Returns the connection or initialization failure. The same failure is
    /// shown on the network error surface, except for [`Error::UserRejected`].
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect(reply))?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Transfers `amount` tokens from the connected account to `to`.
    /// Resolves once the outcome is reflected in the state.
    ///
    /// # Errors
    ///
    /// * [`Error::SessionNotReady`] without a `Ready` session.
    /// * [`Error::TransferInFlight`] while another transfer is unresolved.
    pub async fn transfer(
        &self,
        to: Address,
        amount: U256,
    ) -> Result<TransactionOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Transfer { to, amount, reply })?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Drops the session and all data derived from it.
    ///
    /// # Errors
    ///
    /// May fail if the state machine has stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Clears the network error surface.
    ///
    /// # Errors
    ///
    /// May fail if the state machine has stopped.
    pub fn dismiss_network_error(&self) -> Result<()> {
        self.send(Command::DismissNetworkError)
    }

    /// Clears the transaction error surface.
    ///
    /// # Errors
    ///
    /// May fail if the state machine has stopped.
    pub fn dismiss_transaction_error(&self) -> Result<()> {
        self.send(Command::DismissTransactionError)
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

struct InFlightTransfer {
    id: u64,
    /// Cleared when the session is torn down; the reply is still sent.
    visible: bool,
    reply: oneshot::Sender<Result<TransactionOutcome>>,
}

struct Machine {
    manager: SessionManager,
    coordinator: TransactionCoordinator,
    contract: Arc<dyn TokenContract>,
    poll_interval: Duration,
    state: SessionState,
    view: watch::Sender<SessionState>,
    epoch: u64,
    poller: Option<BalancePoller>,
    /// Opened on the first successful connect and kept for the controller's
    /// lifetime.
    wallet_events: Option<WalletEvents>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    transfer: Option<InFlightTransfer>,
    next_transfer_id: u64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Machine {
    fn new(
        config: DappConfig,
        wallet: Option<Arc<dyn WalletProvider>>,
        contract: Arc<dyn TokenContract>,
        view: watch::Sender<SessionState>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            manager: SessionManager::new(wallet, config.network),
            coordinator: TransactionCoordinator::new(contract.clone()),
            contract,
            poll_interval: config.poll_interval,
            state: SessionState::default(),
            view,
            epoch: 0,
            poller: None,
            wallet_events: None,
            connect_waiters: Vec::new(),
            transfer: None,
            next_transfer_id: 0,
            completions,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => break,
                },
                event = next_wallet_event(&mut self.wallet_events) => Step::Wallet(event),
                Some(completion) = completions.recv() => Step::Completion(completion),
            };

            match step {
                Step::Command(command) => self.on_command(command),
                Step::Wallet(Some(event)) => self.on_wallet_event(event),
                Step::Wallet(None) => {
                    tracing::warn!("wallet notification stream closed");
                    self.wallet_events = None;
                }
                Step::Completion(completion) => self.on_completion(completion),
            }
            self.publish();
        }

        self.stop_polling();
        tracing::debug!("session controller stopped");
    }

    fn publish(&self) {
        self.view.send_if_modified(|view| {
            if *view == self.state {
                return false;
            }
            view.clone_from(&self.state);
            true
        });
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Transfer { to, amount, reply } => {
                self.transfer(to, amount, reply);
            }
            Command::Disconnect => {
                tracing::info!("session disconnected by user");
                self.teardown();
            }
            Command::DismissNetworkError => self.state.network_error = None,
            Command::DismissTransactionError => {
                self.state.transaction_error = None;
            }
        }
    }

    fn on_wallet_event(&mut self, event: WalletEvent) {
        if self.state.session.is_none() {
            return;
        }

        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first() {
                None => {
                    tracing::info!("wallet reported no accounts, tearing down session");
                    self.teardown();
                }
                Some(&address) => self.switch_account(address),
            },
            WalletEvent::ChainChanged(chain_id) => {
                tracing::info!(%chain_id, "wallet chain changed");
                if let Some(session) = self.state.session.as_mut() {
                    session.chain_id = chain_id;
                }
                self.check_network();
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connected { epoch, result } if epoch == self.epoch => {
                self.on_connected(result);
            }
            Completion::NetworkChecked { epoch, result } if epoch == self.epoch => {
                self.on_network_checked(result);
            }
            Completion::Initialized { epoch, result } if epoch == self.epoch => {
                self.on_initialized(result);
            }
            Completion::Snapshot { epoch, snapshot }
                if epoch == self.epoch && self.state.phase == Phase::Ready =>
            {
                self.state.token = Some(snapshot);
            }
            Completion::Submitted { id, pending } => {
                if self.transfer.as_ref().is_some_and(|t| t.id == id && t.visible) {
                    self.state.pending = Some(pending);
                }
            }
            Completion::Resolved { id, outcome } => self.on_resolved(id, outcome),
            _ => tracing::trace!("dropping stale completion"),
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        self.connect_waiters.push(reply);

        if self.state.session.is_some() {
            self.check_network();
            return;
        }
        if self.state.phase == Phase::Connecting {
            return;
        }

        self.state.phase = Phase::Connecting;
        let epoch = self.epoch;
        let manager = self.manager.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = manager.connect().await;
            let _ = completions.send(Completion::Connected { epoch, result });
        });
    }

    fn on_connected(&mut self, result: Result<Session>) {
        match result {
            Ok(session) => {
                self.state.session = Some(session);
                self.ensure_subscribed();
                self.check_network();
            }
            Err(err) => {
                self.state.phase = Phase::Disconnected;
                self.fail_connect(err);
            }
        }
    }

    fn ensure_subscribed(&mut self) {
        if self.wallet_events.is_some() {
            return;
        }
        match self.manager.subscribe() {
            Ok(events) => self.wallet_events = Some(events),
            Err(err) => tracing::warn!(%err, "could not subscribe to wallet events"),
        }
    }

    /// Enters `NetworkCheck`. No contract call happens until it passes.
    fn check_network(&mut self) {
        self.begin_epoch();
        self.state.phase = Phase::NetworkCheck;

        let epoch = self.epoch;
        let manager = self.manager.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = manager.ensure_network().await;
            let _ = completions.send(Completion::NetworkChecked { epoch, result });
        });
    }

    fn on_network_checked(&mut self, result: Result<ChainId>) {
        let Some(session) = self.state.session.as_mut() else {
            return;
        };

        match result {
            Ok(chain_id) => {
                session.chain_id = chain_id;
                self.state.phase = Phase::Ready;
                tracing::info!(%chain_id, "network check passed");
                self.initialize();
            }
            Err(err) => {
                tracing::warn!(%err, "network check failed");
                self.fail_connect(err);
            }
        }
    }

    /// Reads token data for the session account, then starts polling.
    fn initialize(&mut self) {
        let Some(session) = self.state.session.as_ref() else {
            return;
        };

        let epoch = self.epoch;
        let account = session.address;
        let contract = self.contract.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = read_snapshot(contract.as_ref(), account).await;
            let _ = completions.send(Completion::Initialized { epoch, result });
        });
    }

    fn on_initialized(&mut self, result: Result<TokenSnapshot>) {
        if self.state.phase != Phase::Ready {
            return;
        }

        match result {
            Ok(snapshot) => {
                let metadata = TokenMetadata {
                    name: snapshot.name.clone(),
                    symbol: snapshot.symbol.clone(),
                };
                self.state.token = Some(snapshot);
                self.start_polling(metadata);
                self.resolve_connect(&Ok(()));
            }
            Err(err) => {
                tracing::error!(%err, "failed to load token data");
                self.fail_connect(err);
            }
        }
    }

    fn switch_account(&mut self, address: Address) {
        let Some(session) = self.state.session.as_mut() else {
            return;
        };
        tracing::info!(%address, "wallet account changed");
        session.address = address;
        self.state.token = None;

        if self.state.phase == Phase::Ready {
            self.begin_epoch();
            self.initialize();
        } else {
            self.check_network();
        }
    }

    fn transfer(
        &mut self,
        to: Address,
        amount: U256,
        reply: oneshot::Sender<Result<TransactionOutcome>>,
    ) {
        let from = match &self.state.session {
            Some(session) if self.state.phase == Phase::Ready => session.address,
            _ => {
                let _ = reply.send(Err(Error::SessionNotReady));
                return;
            }
        };
        if self.transfer.is_some() {
            let _ = reply.send(Err(Error::TransferInFlight));
            return;
        }

        self.state.transaction_error = None;
        let id = self.next_transfer_id;
        self.next_transfer_id += 1;
        self.transfer = Some(InFlightTransfer { id, visible: true, reply });

        let coordinator = self.coordinator.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = coordinator
                .transfer(from, to, amount, |pending| {
                    let _ = completions.send(Completion::Submitted { id, pending });
                })
                .await;
            let _ = completions.send(Completion::Resolved { id, outcome });
        });
    }

    fn on_resolved(&mut self, id: u64, outcome: TransactionOutcome) {
        let Some(transfer) = self.transfer.take_if(|t| t.id == id) else {
            return;
        };

        if transfer.visible {
            self.state.pending = None;
            if let Some(err) = outcome.error() {
                self.state.transaction_error = Some(err);
            }
            if matches!(outcome, TransactionOutcome::Success(_)) {
                if let Some(poller) = &self.poller {
                    poller.refresh();
                }
            }
        }
        let _ = transfer.reply.send(Ok(outcome));
    }

    /// Resets to `Disconnected`, clearing every piece of derived state.
    fn teardown(&mut self) {
        self.begin_epoch();
        self.state = SessionState::default();
        if let Some(transfer) = &mut self.transfer {
            transfer.visible = false;
        }
        self.resolve_connect(&Err(Error::SessionNotReady));
    }

    fn fail_connect(&mut self, err: Error) {
        if err != Error::UserRejected {
            self.state.network_error = Some(err.clone());
        }
        self.resolve_connect(&Err(err));
    }

    fn resolve_connect(&mut self, result: &Result<()>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn begin_epoch(&mut self) {
        self.epoch += 1;
        self.stop_polling();
    }

    fn start_polling(&mut self, metadata: TokenMetadata) {
        self.stop_polling();
        let Some(session) = &self.state.session else {
            return;
        };

        let epoch = self.epoch;
        let completions = self.completions.clone();
        self.poller = Some(BalancePoller::start(
            self.contract.clone(),
            session.address,
            metadata,
            self.poll_interval,
            move |snapshot| {
                let _ = completions.send(Completion::Snapshot { epoch, snapshot });
            },
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }
}

async fn next_wallet_event(events: &mut Option<WalletEvents>) -> Option<WalletEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn read_snapshot(
    contract: &dyn TokenContract,
    account: Address,
) -> Result<TokenSnapshot> {
    Ok(TokenSnapshot {
        name: contract.name().await?,
        symbol: contract.symbol().await?,
        balance: contract.balance_of(account).await?,
    })
}
