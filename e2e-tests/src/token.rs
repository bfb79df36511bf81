use alloy_primitives::{Address, U256};
use e2e::EventExt;
use eyre::{bail, Result};
use token_dapp::{Error, Receipt, TokenContract, TransactionOutcome};

use crate::{deploy_token_fixture, TokenFixture, ADDR1, ADDR2, OWNER, TOTAL_SUPPLY};

async fn send(fx: &TokenFixture, to: Address, amount: u64) -> Result<Receipt> {
    match fx.controller.transfer(to, U256::from(amount)).await? {
        TransactionOutcome::Success(receipt) => Ok(receipt),
        outcome => bail!("transfer did not succeed: {outcome:?}"),
    }
}

// ============================================================================
// Deployment
// ============================================================================

#[tokio::test(start_paused = true)]
async fn sets_the_right_owner() -> Result<()> {
    let fx = deploy_token_fixture()?;
    fx.controller.connect().await?;

    let session = fx.controller.state().session.expect("session after connect");
    assert_eq!(session.address, OWNER);
    assert_eq!(fx.token.balance_of(OWNER).await?, U256::from(TOTAL_SUPPLY));
    assert_eq!(fx.token.balance_of(ADDR1).await?, U256::ZERO);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn assigns_total_supply_to_owner() -> Result<()> {
    let fx = deploy_token_fixture()?;
    fx.controller.connect().await?;

    let state = fx.controller.state();
    let token = state.token.as_ref().expect("token data after connect");
    assert_eq!(token.balance, fx.token.total_supply());
    assert_eq!(token.balance, U256::from(TOTAL_SUPPLY));
    assert_eq!(state.transfer_offer(), Some("MHT"));
    Ok(())
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transfers_tokens_between_accounts() -> Result<()> {
    let fx = deploy_token_fixture()?;
    fx.controller.connect().await?;

    send(&fx, ADDR1, 50).await?;
    assert_eq!(fx.token.balance(ADDR1), U256::from(50));
    fx.wait_for(|s| {
        s.token.as_ref().is_some_and(|t| t.balance == U256::from(TOTAL_SUPPLY - 50))
    })
    .await?;

    let state = fx.switch_account(ADDR1).await?;
    assert_eq!(state.token.map(|t| t.balance), Some(U256::from(50)));

    send(&fx, ADDR2, 50).await?;
    assert_eq!(fx.token.balance(ADDR1), U256::ZERO);
    assert_eq!(fx.token.balance(ADDR2), U256::from(50));

    let state = fx.wait_for(|s| s.token.as_ref().is_some_and(|t| t.balance.is_zero())).await?;
    assert_eq!(state.transfer_offer(), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn emits_transfer_events() -> Result<()> {
    let fx = deploy_token_fixture()?;
    fx.controller.connect().await?;

    let receipt = send(&fx, ADDR1, 50).await?;
    receipt.emitted(&fx.transfer)?.with_args(&[OWNER.into(), ADDR1.into(), 50u64.into()])?;
    assert!((receipt, fx.address).emits(&fx.transfer, &[OWNER.into(), ADDR1.into(), 50u64.into()]));

    fx.switch_account(ADDR1).await?;
    let receipt = send(&fx, ADDR2, 50).await?;
    receipt.emitted(&fx.transfer)?.with_args(&[ADDR1.into(), ADDR2.into(), 50u64.into()])?;
    assert!(!receipt.emits(&fx.transfer, &[ADDR1.into(), ADDR2.into(), 51u64.into()]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fails_if_sender_has_not_enough_tokens() -> Result<()> {
    let fx = deploy_token_fixture()?;
    fx.controller.connect().await?;
    let initial_owner_balance = fx.token.balance(OWNER);

    let state = fx.switch_account(ADDR1).await?;
    assert!(state.has_no_tokens());

    let outcome = fx.controller.transfer(OWNER, U256::from(1)).await?;
    assert_eq!(outcome, TransactionOutcome::Failed("Not enough tokens".to_owned()));

    let state = fx.controller.state();
    assert_eq!(
        state.transaction_error,
        Some(Error::RpcFailure("Not enough tokens".to_owned()))
    );
    assert!(state.pending.is_none());
    assert_eq!(fx.token.balance(OWNER), initial_owner_balance);
    Ok(())
}
