/*!
Wallet session and transaction lifecycle for a single ERC-20 token.

The crate connects a browser-style wallet, keeps it on the required network,
polls the token balance of the selected account and drives transfers through
submission, pending and resolution. Everything is observable through a
[`SessionState`] published by the [`SessionController`].

## Usage

```rust,no_run
use std::sync::Arc;

use token_dapp::{
    rpc::{RpcToken, RpcWallet},
    AddressRegistry, DappConfig, SessionController,
};

# async fn run() -> eyre::Result<()> {
let config = DappConfig::from_env()?;
let registry = AddressRegistry::from_json(&std::fs::read_to_string(
    "deployed_addresses.json",
)?)?;
let token = RpcToken::from_registry(&config, &registry)?;
let wallet = RpcWallet::connect_http(config.network.rpc_endpoint.clone());

let controller =
    SessionController::spawn(config, Some(Arc::new(wallet)), Arc::new(token));
controller.connect().await?;
println!("{:?}", controller.state().token);
# Ok(())
# }
```

Both capabilities are traits, [`WalletProvider`] and [`TokenContract`], so
the core runs unchanged against the in-memory doubles of the `test-utils`
feature.
*/

pub mod abi;
pub mod config;
pub mod contract;
pub mod controller;
pub mod error;
pub mod poller;
pub mod rpc;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;
pub mod wallet;

pub use abi::{AddressRegistry, Artifact, EventSpec};
pub use config::{DappConfig, NetworkRequirement};
pub use contract::{LogRecord, Receipt, ReceiptStatus, TokenContract};
pub use controller::{SessionController, SessionState};
pub use error::{Error, Result};
pub use poller::TokenSnapshot;
pub use session::{Phase, Session};
pub use transaction::{PendingTransaction, TransactionOutcome};
pub use wallet::{ChainId, ProviderError, WalletEvent, WalletProvider};
