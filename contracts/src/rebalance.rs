//! # Rebalancing Engine
//!
//! Asset-manager operations that change what the vault holds or owes:
//! basket updates through solver swaps, token removal, borrowing, flash-loan
//! backed repayment and collateral toggles.
//!
//! ## State machines
//!
//! ```text
//! update:  Idle → ValidatingIntent → ExecutingSells → ExecutingBuys → UpdatingBasket → Idle
//! repay:   Idle → ValidatingRepayIntent → FlashBorrow → RepayDebt → SwapSurplus
//!               → RepayFlashLoan → UpdatingCollateralState → Idle
//! borrow:  Idle → ValidatingIntent → UpdatingCollateralState → Borrowing → UpdatingBasket → Idle
//! ```
//!
//! Every call runs inside the vault's transactional boundary, so a failure
//! in any stage leaves the basket, the ledger and the event log untouched.
//! The stage path actually taken is returned in the [`RebalanceReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use folio_protocol::config::BPS_DENOMINATOR;
use folio_protocol::math::{self, inflate_up, mul_div};
use folio_protocol::solver::SolverHandler;
use folio_protocol::{Address, Ledger, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calculations::{self, CollateralSource};
use crate::context::ExecutionContext;
use crate::error::{Role, VaultError};
use crate::events::VaultEvent;
use crate::flash;
use crate::intent::{BorrowRequest, FlashRepayIntent, RebalanceIntent};
use crate::portfolio::{Portfolio, TokenRemoval};
use crate::position::Position;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A state-machine stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Not running.
    Idle,
    /// Checking a rebalance, borrow or collateral request.
    ValidatingIntent,
    /// Sending sell legs through the solver.
    ExecutingSells,
    /// Checking buy-side minimums.
    ExecutingBuys,
    /// Committing the new basket.
    UpdatingBasket,
    /// Checking a flash repay intent.
    ValidatingRepayIntent,
    /// Taking the flash loan.
    FlashBorrow,
    /// Swapping into and repaying debts.
    RepayDebt,
    /// Redeeming and swapping collateral to cover the premium.
    SwapSurplus,
    /// Settling the flash loan.
    RepayFlashLoan,
    /// Flipping collateral flags.
    UpdatingCollateralState,
    /// Opening debt.
    Borrowing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    /// Unique id for correlating logs.
    pub id: Uuid,
    /// Engine operation name.
    pub operation: String,
    /// Stage path, starting and ending in [`Stage::Idle`].
    pub stages: Vec<Stage>,
    /// Net USD18 value before execution.
    pub value_before_usd: U256,
    /// Net USD18 value after execution.
    pub value_after_usd: U256,
    /// Tokens taken out of the basket.
    pub removals: Vec<TokenRemoval>,
}

struct StageTrace {
    vault: Address,
    operation: &'static str,
    stages: Vec<Stage>,
}

impl StageTrace {
    fn start(vault: Address, operation: &'static str) -> Self {
        Self {
            vault,
            operation,
            stages: vec![Stage::Idle],
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(vault = %self.vault, operation = self.operation, %stage, "stage");
        self.stages.push(stage);
    }

    fn finish(
        mut self,
        value_before_usd: U256,
        value_after_usd: U256,
        removals: Vec<TokenRemoval>,
    ) -> RebalanceReport {
        self.stages.push(Stage::Idle);
        let report = RebalanceReport {
            id: Uuid::new_v4(),
            operation: self.operation.to_string(),
            stages: self.stages,
            value_before_usd,
            value_after_usd,
            removals,
        };
        info!(
            vault = %self.vault,
            operation = self.operation,
            id = %report.id,
            before = %value_before_usd,
            after = %value_after_usd,
            "rebalance committed"
        );
        report
    }
}

/// Validated repay amounts.
struct RepayPlan {
    amounts: Vec<U256>,
    weights: Vec<U256>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs asset-manager operations against a vault.
#[derive(Debug, Clone, Copy)]
pub struct RebalancingEngine<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> RebalancingEngine<'a> {
    /// Creates an engine over the shared context.
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Swaps through the intent's legs and commits its basket.
    ///
    /// Tokens dropped from the basket become exclusion proceeds for the
    /// current holders.
    pub fn update_tokens(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        intent: &RebalanceIntent,
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "update_tokens", |vault, ledger| {
            self.run_update_tokens(vault, ledger, caller, intent)
        })
    }

    /// Drops `token` from the basket without swapping it.
    pub fn remove_portfolio_token(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        token: Address,
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "remove_portfolio_token", |vault, ledger| {
            let mut trace = StageTrace::start(vault.address(), "remove_portfolio_token");
            trace.enter(Stage::ValidatingIntent);
            vault.require_role(caller, Role::AssetManager)?;
            if !vault.tokens().contains(&token) {
                return Err(VaultError::NotInBasket(token));
            }
            if vault.backs_debt(ledger, &token)? {
                return Err(VaultError::TokenBacksDebt(token));
            }
            let before = self.net_value(vault, ledger)?;

            trace.enter(Stage::UpdatingBasket);
            let removal = vault.exclude_token(ledger, token)?;
            let remaining: Vec<Address> = vault.tokens().iter().copied().filter(|t| *t != token).collect();
            vault.set_tokens(ledger, remaining);
            let after = self.net_value(vault, ledger)?;
            Ok(trace.finish(before, after, vec![removal]))
        })
    }

    /// Opens debt at a lending pool after enabling the given collateral.
    pub fn borrow(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        request: &BorrowRequest,
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "borrow", |vault, ledger| {
            self.run_borrow(vault, ledger, caller, request)
        })
    }

    /// Repays debt with a flash loan.
    pub fn repay(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        intent: &FlashRepayIntent,
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "repay", |vault, ledger| {
            self.run_repay(vault, ledger, caller, intent)
        })
    }

    /// Enables lending tokens as collateral. Already-enabled tokens are
    /// skipped.
    pub fn enable_collateral_tokens(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        pool: Address,
        tokens: &[Address],
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "enable_collateral_tokens", |vault, ledger| {
            self.run_set_collateral(vault, ledger, caller, pool, tokens, true)
        })
    }

    /// Disables lending tokens as collateral. Fails if the remaining
    /// collateral no longer covers the debt.
    pub fn disable_collateral_tokens(
        &self,
        portfolio: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        pool: Address,
        tokens: &[Address],
    ) -> Result<RebalanceReport, VaultError> {
        portfolio.transact(ledger, "disable_collateral_tokens", |vault, ledger| {
            self.run_set_collateral(vault, ledger, caller, pool, tokens, false)
        })
    }

    // -----------------------------------------------------------------------
    // Token updates
    // -----------------------------------------------------------------------

    fn run_update_tokens(
        &self,
        vault: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        intent: &RebalanceIntent,
    ) -> Result<RebalanceReport, VaultError> {
        let mut trace = StageTrace::start(vault.address(), "update_tokens");
        trace.enter(Stage::ValidatingIntent);
        vault.require_role(caller, Role::AssetManager)?;
        let snapshot = vault.snapshot(ledger, self.ctx)?;
        let before = calculations::value_basket(self.ctx.oracle(), &snapshot)?.net_usd;
        self.validate_rebalance(vault, ledger, intent, |token| snapshot.amount_of(token))?;
        let handler = self.ctx.solvers.get(&intent.handler)?;
        let address = vault.address();

        trace.enter(Stage::ExecutingSells);
        let mut minimums: BTreeMap<Address, U256> = BTreeMap::new();
        for leg in &intent.swaps {
            let entry = minimums.entry(leg.buy_token).or_insert(U256::ZERO);
            *entry = math::add(*entry, leg.min_output)?;
        }
        let balances_before: BTreeMap<Address, U256> = minimums
            .keys()
            .map(|t| (*t, ledger.tokens.balance_of(t, &address)))
            .collect();
        for leg in &intent.swaps {
            flash::swap_through(
                ledger,
                handler.as_ref(),
                address,
                leg.sell_token,
                leg.sell_amount,
                &leg.call_data,
            )?;
        }

        trace.enter(Stage::ExecutingBuys);
        for (token, expected) in &minimums {
            let start = balances_before.get(token).copied().unwrap_or(U256::ZERO);
            let received = ledger.tokens.balance_of(token, &address).saturating_sub(start);
            if received < *expected {
                return Err(VaultError::InsufficientOutput {
                    token: *token,
                    expected: *expected,
                    received,
                });
            }
        }

        trace.enter(Stage::UpdatingBasket);
        let dropped: Vec<Address> = vault
            .tokens()
            .iter()
            .copied()
            .filter(|t| !intent.new_tokens.contains(t))
            .collect();
        let mut removals = Vec::with_capacity(dropped.len());
        for token in dropped {
            removals.push(vault.exclude_token(ledger, token)?);
        }
        vault.set_tokens(ledger, intent.new_tokens.clone());
        let after = self.net_value(vault, ledger)?;
        Ok(trace.finish(before, after, removals))
    }

    fn validate_rebalance(
        &self,
        vault: &Portfolio,
        ledger: &Ledger,
        intent: &RebalanceIntent,
        holding: impl Fn(&Address) -> U256,
    ) -> Result<(), VaultError> {
        crate::portfolio::validate_basket_shape(&intent.new_tokens, self.ctx)?;
        for token in &intent.new_tokens {
            if !vault.tokens().contains(token) {
                vault.ensure_token_allowed(token)?;
            }
        }
        self.ctx.solvers.get(&intent.handler)?;

        let mut sold: BTreeMap<Address, U256> = BTreeMap::new();
        let mut bought = BTreeSet::new();
        for leg in &intent.swaps {
            if !vault.tokens().contains(&leg.sell_token) {
                return Err(VaultError::NotInBasket(leg.sell_token));
            }
            if leg.sell_amount.is_zero() {
                return Err(VaultError::ZeroAmount);
            }
            if !intent.new_tokens.contains(&leg.buy_token) {
                return Err(VaultError::BuyTokenNotInBasket(leg.buy_token));
            }
            let entry = sold.entry(leg.sell_token).or_insert(U256::ZERO);
            *entry = math::add(*entry, leg.sell_amount)?;
            bought.insert(leg.buy_token);
        }
        for (token, requested) in &sold {
            if bought.contains(token) {
                return Err(VaultError::SellAndBuySameToken(*token));
            }
            let held = holding(token);
            if *requested > held {
                return Err(VaultError::InsufficientHolding {
                    token: *token,
                    held,
                    requested: *requested,
                });
            }
        }

        for token in vault.tokens() {
            if !intent.new_tokens.contains(token) && vault.backs_debt(ledger, token)? {
                return Err(VaultError::TokenBacksDebt(*token));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Borrow
    // -----------------------------------------------------------------------

    fn run_borrow(
        &self,
        vault: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        request: &BorrowRequest,
    ) -> Result<RebalanceReport, VaultError> {
        let mut trace = StageTrace::start(vault.address(), "borrow");
        trace.enter(Stage::ValidatingIntent);
        vault.require_role(caller, Role::AssetManager)?;
        let address = vault.address();
        if request.on_behalf_of != address {
            return Err(VaultError::InvalidPosition {
                token: request.borrow_token,
                reason: format!("debt must be opened for the vault, not {}", request.on_behalf_of),
            });
        }
        if request.amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        if !self.ctx.assets.position(&request.borrow_token)?.supports_borrow() {
            return Err(VaultError::InvalidPosition {
                token: request.borrow_token,
                reason: "position cannot be borrowed".into(),
            });
        }
        ledger.pool(&request.pool)?.reserve(&request.borrow_token)?;
        if !vault.tokens().contains(&request.borrow_token) {
            vault.ensure_token_allowed(&request.borrow_token)?;
        }
        for token in &request.collateral_tokens {
            self.ensure_pool_collateral(vault, request.pool, token)?;
        }
        let before = self.net_value(vault, ledger)?;

        trace.enter(Stage::UpdatingCollateralState);
        for token in &request.collateral_tokens {
            self.toggle_collateral(vault, ledger, request.pool, *token, true)?;
        }

        trace.enter(Stage::Borrowing);
        {
            let (pool, tokens) = ledger.pool_and_tokens(&request.pool)?;
            pool.borrow(
                tokens,
                self.ctx.oracle(),
                address,
                request.borrow_token,
                request.amount,
                address,
            )
            .map_err(VaultError::CollateralInsufficient)?;
        }
        vault.track_debt_pool(request.pool);
        vault.emit(
            ledger,
            VaultEvent::Borrowed {
                pool: request.pool,
                token: request.borrow_token,
                amount: request.amount,
            },
        );

        trace.enter(Stage::UpdatingBasket);
        vault.add_token(ledger, request.borrow_token)?;
        let after = self.net_value(vault, ledger)?;
        Ok(trace.finish(before, after, Vec::new()))
    }

    // -----------------------------------------------------------------------
    // Flash-loan repay
    // -----------------------------------------------------------------------

    fn run_repay(
        &self,
        vault: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        intent: &FlashRepayIntent,
    ) -> Result<RebalanceReport, VaultError> {
        let mut trace = StageTrace::start(vault.address(), "repay");
        trace.enter(Stage::ValidatingRepayIntent);
        vault.require_role(caller, Role::AssetManager)?;
        let plan = self.validate_repay(vault, ledger, intent)?;
        let handler = self.ctx.solvers.get(&intent.solver_handler)?;
        let address = vault.address();
        let before = self.net_value(vault, ledger)?;

        trace.enter(Stage::FlashBorrow);
        let balance_before = ledger.tokens.balance_of(&intent.flash_loan_token, &address);
        let loan = flash::borrow(
            ledger,
            intent.pool,
            address,
            intent.flash_loan_token,
            intent.flash_loan_amount,
        )?;

        trace.enter(Stage::RepayDebt);
        let total_weight = math::sum(plan.weights.iter().copied())?;
        for (i, token) in intent.debt_tokens.iter().enumerate() {
            if *token != intent.flash_loan_token {
                let portion = mul_div(intent.flash_loan_amount, plan.weights[i], total_weight)?;
                flash::swap_through(
                    ledger,
                    handler.as_ref(),
                    address,
                    intent.flash_loan_token,
                    portion,
                    &intent.first_swap_data[i],
                )?;
            }
            {
                let (pool, tokens) = ledger.pool_and_tokens(&intent.pool)?;
                pool.repay(tokens, address, *token, plan.amounts[i], address)?;
            }
            vault.emit(
                ledger,
                VaultEvent::DebtRepaid {
                    pool: intent.pool,
                    token: *token,
                    amount: plan.amounts[i],
                },
            );
        }

        trace.enter(Stage::SwapSurplus);
        let needed = flash::shortfall(ledger, &loan, balance_before)?;
        if !needed.is_zero() && !intent.protocol_tokens.is_empty() {
            self.cover_shortfall(ledger, address, intent, handler.as_ref(), needed)?;
        }

        trace.enter(Stage::RepayFlashLoan);
        let surplus = flash::settle(ledger, loan, balance_before)?;
        debug!(vault = %address, token = %intent.flash_loan_token, %surplus, "flash surplus retained");

        trace.enter(Stage::UpdatingCollateralState);
        for token in &intent.protocol_tokens {
            let emptied = ledger.tokens.balance_of(token, &address).is_zero();
            if emptied {
                self.toggle_collateral(vault, ledger, intent.pool, *token, false)?;
            }
        }
        vault.refresh_debt_pools(ledger);
        let after = self.net_value(vault, ledger)?;
        Ok(trace.finish(before, after, Vec::new()))
    }

    fn validate_repay(
        &self,
        vault: &Portfolio,
        ledger: &Ledger,
        intent: &FlashRepayIntent,
    ) -> Result<RepayPlan, VaultError> {
        let address = vault.address();
        let debts = intent.debt_tokens.len();
        check_len("debt_repay_amounts", debts, intent.debt_repay_amounts.len())?;
        check_len("first_swap_data", debts, intent.first_swap_data.len())?;
        check_len(
            "second_swap_data",
            intent.protocol_tokens.len(),
            intent.second_swap_data.len(),
        )?;
        if debts == 0 || intent.flash_loan_amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        calculations::validate_buffers(intent.collateral_buffer_unit, intent.flash_loan_buffer_unit)?;
        self.ctx.solvers.get(&intent.solver_handler)?;

        let pool = ledger.pool(&intent.pool)?;
        pool.reserve(&intent.flash_loan_token)?;

        let mut seen = BTreeSet::new();
        let mut amounts = Vec::with_capacity(debts);
        for (i, token) in intent.debt_tokens.iter().enumerate() {
            if !seen.insert(*token) {
                return Err(VaultError::DuplicateToken(*token));
            }
            let debt = pool.debt_of(&address, token);
            if debt.is_zero() {
                return Err(VaultError::NoDebt {
                    pool: intent.pool,
                    token: *token,
                });
            }
            let amount = if intent.is_max_repayment {
                debt
            } else {
                let requested = intent.debt_repay_amounts[i];
                if requested.is_zero() {
                    return Err(VaultError::ZeroAmount);
                }
                if requested > debt {
                    return Err(VaultError::RepayExceedsDebt {
                        token: *token,
                        debt,
                        requested,
                    });
                }
                requested
            };
            let needs_swap = *token != intent.flash_loan_token;
            match (needs_swap, intent.first_swap_data[i].is_empty()) {
                (true, true) => return Err(VaultError::MissingSwapData(*token)),
                (false, false) => return Err(VaultError::UnexpectedSwapData(*token)),
                _ => {}
            }
            amounts.push(amount);
        }

        let mut seen = BTreeSet::new();
        for token in &intent.protocol_tokens {
            if !seen.insert(*token) {
                return Err(VaultError::DuplicateToken(*token));
            }
            self.ensure_pool_collateral(vault, intent.pool, token)?;
            if !pool.is_collateral_enabled(&address, token) {
                return Err(VaultError::InvalidPosition {
                    token: *token,
                    reason: "not enabled as collateral".into(),
                });
            }
        }

        let premium_bps = pool.flash_loan_premium_bps();
        let same_token = intent.debt_tokens.iter().all(|t| *t == intent.flash_loan_token);
        let weights = if same_token {
            let required = calculations::min_flash_loan_for_repay(math::sum(amounts.iter().copied())?, premium_bps)?;
            if intent.flash_loan_amount < required {
                return Err(VaultError::FlashLoanUndersized {
                    flash_usd: intent.flash_loan_amount,
                    required_usd: required,
                });
            }
            amounts.clone()
        } else {
            let oracle = self.ctx.oracle();
            let mut repay_usd = Vec::with_capacity(debts);
            for (token, amount) in intent.debt_tokens.iter().zip(&amounts) {
                repay_usd.push(oracle.convert_to_usd18(*token, *amount)?);
            }
            let required = inflate_up(
                math::sum(repay_usd.iter().copied())?,
                premium_bps as u64,
                BPS_DENOMINATOR,
            )?;
            let flash_usd = oracle.convert_to_usd18(intent.flash_loan_token, intent.flash_loan_amount)?;
            let tolerated = inflate_up(flash_usd, intent.flash_loan_buffer_unit, BPS_DENOMINATOR)?;
            if tolerated < required {
                return Err(VaultError::FlashLoanUndersized {
                    flash_usd,
                    required_usd: required,
                });
            }
            repay_usd
        };
        debug!(
            vault = %address,
            pool = %intent.pool,
            flash = %intent.flash_loan_amount,
            max = intent.is_max_repayment,
            "repay intent validated"
        );
        Ok(RepayPlan { amounts, weights })
    }

    /// Redeems collateral pro rata and swaps it into the flash token until
    /// `needed` is covered.
    fn cover_shortfall(
        &self,
        ledger: &mut Ledger,
        vault: Address,
        intent: &FlashRepayIntent,
        handler: &dyn SolverHandler,
        needed: U256,
    ) -> Result<(), VaultError> {
        let pool = ledger.pool(&intent.pool)?;
        let mut sources = Vec::with_capacity(intent.protocol_tokens.len());
        for token in &intent.protocol_tokens {
            sources.push(CollateralSource {
                lending_token: *token,
                underlying: pool.reserve_for_lending_token(token)?.underlying,
                available: ledger.tokens.balance_of(token, &vault),
            });
        }
        let oracle = self.ctx.oracle();
        let target_usd = oracle.convert_to_usd18(intent.flash_loan_token, needed)?;
        let plan = calculations::collateral_to_sell(oracle, &sources, target_usd, intent.collateral_buffer_unit)?;
        for (lending_token, amount) in plan {
            let underlying = flash::redeem_to_vault(ledger, oracle, intent.pool, vault, lending_token, amount)?;
            if underlying == intent.flash_loan_token {
                continue;
            }
            let index = intent
                .protocol_tokens
                .iter()
                .position(|t| *t == lending_token)
                .ok_or(VaultError::MissingSwapData(lending_token))?;
            let call_data = &intent.second_swap_data[index];
            if call_data.is_empty() {
                return Err(VaultError::MissingSwapData(lending_token));
            }
            flash::swap_through(ledger, handler, vault, underlying, amount, call_data)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collateral
    // -----------------------------------------------------------------------

    fn run_set_collateral(
        &self,
        vault: &mut Portfolio,
        ledger: &mut Ledger,
        caller: Address,
        pool: Address,
        tokens: &[Address],
        enabled: bool,
    ) -> Result<RebalanceReport, VaultError> {
        let operation = if enabled {
            "enable_collateral_tokens"
        } else {
            "disable_collateral_tokens"
        };
        let mut trace = StageTrace::start(vault.address(), operation);
        trace.enter(Stage::ValidatingIntent);
        vault.require_role(caller, Role::AssetManager)?;
        ledger.pool(&pool)?;
        for token in tokens {
            self.ensure_pool_collateral(vault, pool, token)?;
        }
        let before = self.net_value(vault, ledger)?;

        trace.enter(Stage::UpdatingCollateralState);
        for token in tokens {
            self.toggle_collateral(vault, ledger, pool, *token, enabled)?;
        }
        let after = self.net_value(vault, ledger)?;
        Ok(trace.finish(before, after, Vec::new()))
    }

    /// Flips one collateral flag, logging an event only on change.
    fn toggle_collateral(
        &self,
        vault: &mut Portfolio,
        ledger: &mut Ledger,
        pool_address: Address,
        token: Address,
        enabled: bool,
    ) -> Result<(), VaultError> {
        let changed = {
            let (pool, tokens) = ledger.pool_and_tokens(&pool_address)?;
            pool.set_collateral(tokens, self.ctx.oracle(), vault.address(), token, enabled)?
        };
        if changed {
            vault.emit(
                ledger,
                VaultEvent::CollateralToggled {
                    pool: pool_address,
                    token,
                    enabled,
                },
            );
        }
        Ok(())
    }

    /// `token` must be a basket lending token of `pool`.
    fn ensure_pool_collateral(&self, vault: &Portfolio, pool: Address, token: &Address) -> Result<(), VaultError> {
        if !vault.tokens().contains(token) {
            return Err(VaultError::NotInBasket(*token));
        }
        match self.ctx.assets.position(token)? {
            Position::LendingToken { pool: p, .. } if *p == pool => Ok(()),
            _ => Err(VaultError::InvalidPosition {
                token: *token,
                reason: format!("not a lending token of pool {pool}"),
            }),
        }
    }

    fn net_value(&self, vault: &Portfolio, ledger: &Ledger) -> Result<U256, VaultError> {
        Ok(vault.valuation(ledger, self.ctx)?.net_usd)
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), VaultError> {
    if expected != actual {
        return Err(VaultError::LengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_names_the_field() {
        let err = check_len("first_swap_data", 2, 1).unwrap_err();
        assert!(matches!(
            err,
            VaultError::LengthMismatch {
                field: "first_swap_data",
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn stage_displays_its_name() {
        assert_eq!(Stage::RepayFlashLoan.to_string(), "RepayFlashLoan");
    }
}
