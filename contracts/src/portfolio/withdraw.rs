//! Withdrawals: burn shares, pay out the pro-rata basket, unwind debt.
//!
//! When the vault carries debt, a withdrawal must also retire the
//! withdrawing share of every liability. For each debt the vault
//! flash-borrows the debt token, repays the share, redeems just enough of
//! the holder's collateral share to cover principal plus premium, swaps it
//! back and settles. Whatever collateral was redeemed is no longer paid out.

use folio_protocol::math;
use folio_protocol::{Address, Ledger, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{FeeCharge, Portfolio};
use crate::calculations::{self, CollateralSource};
use crate::context::ExecutionContext;
use crate::error::VaultError;
use crate::events::VaultEvent;
use crate::exclusion::ExclusionClaim;
use crate::fees::{apply_flat_fee, FeeSplit};
use crate::flash;
use crate::intent::{UnwindParams, WithdrawRequest};
use crate::resolver::BasketSnapshot;

/// What a withdrawal produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    /// Shares burned (excludes the exit fee).
    pub shares_burned: U256,
    /// Exit fee shares moved to the treasuries.
    pub exit_fee: FeeSplit,
    /// Basket tokens paid to the receiver.
    pub payouts: Vec<(Address, U256)>,
    /// Debt tokens left over from unwinding, paid to the receiver.
    pub unwind_surplus: Vec<(Address, U256)>,
    /// Exclusion proceeds paid to the receiver.
    pub exclusion_claims: Vec<ExclusionClaim>,
    /// Management and performance fees charged first.
    pub fees: FeeCharge,
}

impl WithdrawReceipt {
    /// Everything the receiver got in `token`.
    pub fn received(&self, token: &Address) -> U256 {
        self.payouts
            .iter()
            .chain(self.unwind_surplus.iter())
            .filter(|(t, _)| t == token)
            .map(|(_, a)| *a)
            .chain(
                self.exclusion_claims
                    .iter()
                    .filter(|c| c.token == *token)
                    .map(|c| c.amount),
            )
            .fold(U256::ZERO, |acc, a| acc.saturating_add(a))
    }
}

impl Portfolio {
    /// Redeems `request.shares` of `holder`'s shares.
    ///
    /// # Errors
    ///
    /// - Policy: cooldown still running.
    /// - Validation: zero or excess shares, missing unwind parameters.
    /// - Slippage: a payout below its minimum.
    /// - Solvency: an unwind that cannot settle its flash loan.
    pub fn withdraw(
        &mut self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        holder: Address,
        request: &WithdrawRequest,
    ) -> Result<WithdrawReceipt, VaultError> {
        self.transact(ledger, "withdraw", |vault, ledger| {
            vault.execute_withdraw(ledger, ctx, holder, request)
        })
    }

    fn execute_withdraw(
        &mut self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        holder: Address,
        request: &WithdrawRequest,
    ) -> Result<WithdrawReceipt, VaultError> {
        if request.shares.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        let balance = self.shares.balance_of(&holder);
        if balance < request.shares {
            return Err(VaultError::InsufficientShares {
                holder,
                balance,
                requested: request.shares,
            });
        }
        self.ensure_cooldown_elapsed(ledger, &holder)?;

        let snapshot = self.snapshot(ledger, ctx)?;
        let valuation = calculations::value_basket(ctx.oracle(), &snapshot)?;
        let fees = self.accrue_fees(ledger, &ctx.protocol_fees, valuation.net_usd)?;

        let supply = self.shares.total_supply();
        let (net, fee) = apply_flat_fee(request.shares, self.config.fees.exit_fee_bps)?;
        let mut payouts = calculations::withdrawal_amounts(&snapshot, net, supply)?;

        let unwind_surplus = if snapshot.has_debt() {
            let params = request.unwind.as_ref().ok_or(VaultError::UnwindRequired)?;
            self.unwind_debts(ledger, ctx, &snapshot, net, supply, params, &mut payouts)?
        } else {
            Vec::new()
        };

        let exit_fee = self.collect_fee(&ctx.protocol_fees, holder, fee)?;
        self.burn_shares(holder, net)?;

        for (token, amount) in payouts.iter().chain(unwind_surplus.iter()) {
            if !amount.is_zero() {
                ledger.tokens.transfer(token, &self.address, &request.receiver, *amount)?;
            }
        }
        let exclusion_claims = self.pay_exclusions(ledger, holder, request.receiver)?;

        let receipt = WithdrawReceipt {
            shares_burned: net,
            exit_fee,
            payouts,
            unwind_surplus,
            exclusion_claims,
            fees,
        };
        for (token, minimum) in &request.min_amounts_out {
            let amount = receipt.received(token);
            if amount < *minimum {
                return Err(VaultError::PayoutBelowMinimum {
                    token: *token,
                    amount,
                    minimum: *minimum,
                });
            }
        }
        self.ensure_minimum_holding(&holder)?;
        self.ensure_debt_healthy(ledger, ctx)?;
        self.refresh_debt_pools(ledger);

        let paid: Vec<(Address, U256)> = receipt
            .payouts
            .iter()
            .chain(receipt.unwind_surplus.iter())
            .filter(|(_, a)| !a.is_zero())
            .copied()
            .collect();
        self.emit(
            ledger,
            VaultEvent::Withdrawn {
                holder,
                receiver: request.receiver,
                shares_burned: net,
                exit_fee,
                payouts: paid,
            },
        );
        info!(
            vault = %self.address,
            %holder,
            receiver = %request.receiver,
            shares = %net,
            fee = %fee,
            "withdraw"
        );
        Ok(receipt)
    }

    /// Retires `shares / supply` of every liability in `snapshot`, deducting
    /// redeemed collateral from `payouts`. Returns debt-token surplus.
    #[allow(clippy::too_many_arguments)]
    fn unwind_debts(
        &self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        snapshot: &BasketSnapshot,
        shares: U256,
        supply: U256,
        params: &UnwindParams,
        payouts: &mut [(Address, U256)],
    ) -> Result<Vec<(Address, U256)>, VaultError> {
        let handler = ctx.solvers.get(&params.handler)?;
        let vault = self.address;
        let mut surplus = Vec::new();

        for liability in &snapshot.liabilities {
            let premium_bps = ledger.pool(&liability.pool)?.flash_loan_premium_bps();
            let sizing = calculations::flash_loan_sizing_for_unwind(
                liability.amount,
                shares,
                supply,
                premium_bps,
                params.collateral_buffer_unit,
                params.flash_loan_buffer_unit,
            )?;
            debug!(
                vault = %vault,
                pool = %liability.pool,
                token = %liability.token,
                debt_share = %sizing.debt_share,
                flash = %sizing.flash_loan_amount,
                "unwinding debt share"
            );

            let before = ledger.tokens.balance_of(&liability.token, &vault);
            let loan = flash::borrow(ledger, liability.pool, vault, liability.token, sizing.flash_loan_amount)?;
            {
                let (pool, tokens) = ledger.pool_and_tokens(&liability.pool)?;
                pool.repay(tokens, vault, liability.token, sizing.debt_share, vault)?;
            }

            let needed = flash::shortfall(ledger, &loan, before)?;
            if !needed.is_zero() {
                let sources = self.collateral_share(ledger, liability.pool, payouts)?;
                let target_usd = ctx.oracle().convert_to_usd18(liability.token, needed)?;
                let plan =
                    calculations::collateral_to_sell(ctx.oracle(), &sources, target_usd, sizing.collateral_buffer_unit)?;
                for (lending_token, amount) in plan {
                    let underlying =
                        flash::redeem_to_vault(ledger, ctx.oracle(), liability.pool, vault, lending_token, amount)?;
                    if underlying != liability.token {
                        let swap = params
                            .swaps
                            .iter()
                            .find(|s| s.debt_token == liability.token && s.collateral_token == lending_token)
                            .ok_or(VaultError::MissingSwapData(lending_token))?;
                        flash::swap_through(ledger, handler.as_ref(), vault, underlying, amount, &swap.call_data)?;
                    }
                    if let Some(entry) = payouts.iter_mut().find(|(t, _)| *t == lending_token) {
                        entry.1 = math::sub(entry.1, amount)?;
                    }
                }
            }

            let gained = flash::settle(ledger, loan, before)?;
            if !gained.is_zero() {
                surplus.push((liability.token, gained));
            }
        }
        Ok(surplus)
    }

    /// The withdrawing holder's remaining payout of each enabled collateral
    /// token at `pool`.
    fn collateral_share(
        &self,
        ledger: &Ledger,
        pool: Address,
        payouts: &[(Address, U256)],
    ) -> Result<Vec<CollateralSource>, VaultError> {
        let pool = ledger.pool(&pool)?;
        let mut sources = Vec::new();
        for lending_token in pool.enabled_collateral(&self.address) {
            let Some((_, available)) = payouts.iter().find(|(t, _)| *t == lending_token) else {
                continue;
            };
            sources.push(CollateralSource {
                lending_token,
                underlying: pool.reserve_for_lending_token(&lending_token)?.underlying,
                available: *available,
            });
        }
        Ok(sources)
    }
}
