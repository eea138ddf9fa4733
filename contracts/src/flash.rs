//! Flash-loan plumbing shared by debt repayment and withdrawal unwinds.
//!
//! A sequence always looks the same: record the vault's balance of the
//! flash token, borrow, repay debt, redeem collateral and swap it back, then
//! settle. Settlement is strict: the vault must end with at least its
//! starting balance plus principal plus premium, so a sequence can never be
//! funded out of the vault's own holdings.

use folio_protocol::lending::FlashLoan;
use folio_protocol::math;
use folio_protocol::oracle::PriceOracle;
use folio_protocol::solver::SolverHandler;
use folio_protocol::{Address, Ledger, U256};
use tracing::debug;

use crate::error::VaultError;

/// Sends `amount` of `sell_token` to the handler and runs `call_data`, with
/// the vault as beneficiary.
pub(crate) fn swap_through(
    ledger: &mut Ledger,
    handler: &dyn SolverHandler,
    vault: Address,
    sell_token: Address,
    amount: U256,
    call_data: &[u8],
) -> Result<(), VaultError> {
    if amount.is_zero() {
        return Err(VaultError::ZeroAmount);
    }
    ledger
        .tokens
        .transfer(&sell_token, &vault, &handler.address(), amount)?;
    handler.execute(&mut ledger.tokens, vault, call_data)?;
    Ok(())
}

/// Redeems `amount` of the vault's `lending_token` at `pool` back to the
/// vault. Returns the underlying token received.
pub(crate) fn redeem_to_vault(
    ledger: &mut Ledger,
    oracle: &dyn PriceOracle,
    pool: Address,
    vault: Address,
    lending_token: Address,
    amount: U256,
) -> Result<Address, VaultError> {
    let (pool, tokens) = ledger.pool_and_tokens(&pool)?;
    let underlying = pool.reserve_for_lending_token(&lending_token)?.underlying;
    pool.redeem(tokens, oracle, vault, lending_token, amount, vault)?;
    Ok(underlying)
}

/// Flash-borrows `amount` of `token` from `pool` to `vault`.
pub(crate) fn borrow(
    ledger: &mut Ledger,
    pool: Address,
    vault: Address,
    token: Address,
    amount: U256,
) -> Result<FlashLoan, VaultError> {
    let (pool, tokens) = ledger.pool_and_tokens(&pool)?;
    Ok(pool.begin_flash_loan(tokens, vault, token, amount)?)
}

/// Flash-token amount still missing before `loan` can settle against a
/// starting balance of `balance_before`.
pub(crate) fn shortfall(ledger: &Ledger, loan: &FlashLoan, balance_before: U256) -> Result<U256, VaultError> {
    let required = math::add(balance_before, loan.amount_owed()?)?;
    let held = ledger.tokens.balance_of(&loan.token, &loan.receiver);
    Ok(required.saturating_sub(held))
}

/// Settles `loan`, requiring the vault to hold `balance_before + owed`.
/// Returns the surplus left over above `balance_before`.
pub(crate) fn settle(ledger: &mut Ledger, loan: FlashLoan, balance_before: U256) -> Result<U256, VaultError> {
    let owed = loan.amount_owed()?;
    let held = ledger.tokens.balance_of(&loan.token, &loan.receiver);
    let gained = held.saturating_sub(balance_before);
    if gained < owed {
        return Err(VaultError::FlashLoanRepaymentShortfall {
            token: loan.token,
            required: owed,
            available: gained,
        });
    }
    let token = loan.token;
    let (pool, tokens) = ledger.pool_and_tokens(&loan.pool)?;
    pool.settle_flash_loan(tokens, loan)?;
    let surplus = math::sub(gained, owed)?;
    debug!(%token, %owed, %surplus, "flash sequence settled");
    Ok(surplus)
}
