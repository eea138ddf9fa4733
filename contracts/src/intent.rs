//! Requests and intents accepted by the vault.
//!
//! These are ephemeral: validated against current state, executed, and
//! dropped. None of them is persisted.

use folio_protocol::solver::CallData;
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

/// One sell/buy pair in a rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    /// Basket token to sell.
    pub sell_token: Address,
    /// Amount to sell.
    pub sell_amount: U256,
    /// Token expected back.
    pub buy_token: Address,
    /// Minimum increase of the vault's `buy_token` balance.
    pub min_output: U256,
    /// Opaque aggregator payload for the handler.
    pub call_data: CallData,
}

/// Change of basket composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceIntent {
    /// Basket after the rebalance.
    pub new_tokens: Vec<Address>,
    /// Solver handler executing every leg.
    pub handler: Address,
    /// Swaps to run before committing the basket.
    pub swaps: Vec<SwapLeg>,
}

/// Flash-loan-backed debt repayment.
///
/// `debt_tokens`, `debt_repay_amounts` and `first_swap_data` are parallel;
/// `protocol_tokens` and `second_swap_data` are parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashRepayIntent {
    /// Lending pool holding the debt and issuing the flash loan.
    pub pool: Address,
    /// Token to flash-borrow.
    pub flash_loan_token: Address,
    /// Principal to flash-borrow.
    pub flash_loan_amount: U256,
    /// Debts to repay.
    pub debt_tokens: Vec<Address>,
    /// Amount of each debt to repay; ignored with `is_max_repayment`.
    pub debt_repay_amounts: Vec<U256>,
    /// Collateral lending tokens that may be redeemed to repay the flash loan.
    pub protocol_tokens: Vec<Address>,
    /// Handler executing both swap legs.
    pub solver_handler: Address,
    /// Flash token to debt token swaps; empty where they are the same token.
    pub first_swap_data: Vec<CallData>,
    /// Collateral underlying to flash token swaps.
    pub second_swap_data: Vec<CallData>,
    /// Collateral sizing margin in 1/100_000 units.
    pub collateral_buffer_unit: u64,
    /// Flash sizing tolerance in 1/10_000 units.
    pub flash_loan_buffer_unit: u64,
    /// Repay the full outstanding debt, read at execution time.
    pub is_max_repayment: bool,
}

/// Opening a debt position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    /// Lending pool.
    pub pool: Address,
    /// Lending tokens to enable as collateral first.
    pub collateral_tokens: Vec<Address>,
    /// Token to borrow.
    pub borrow_token: Address,
    /// Account the debt is opened for; must be the vault.
    pub on_behalf_of: Address,
    /// Amount to borrow.
    pub amount: U256,
}

/// A deposit of basket tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// `(basket token, amount)` pairs.
    pub amounts: Vec<(Address, U256)>,
    /// Fewest net shares the depositor accepts.
    pub min_mint_amount: U256,
}

/// Collateral swap used while unwinding one debt on withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralSwap {
    /// Debt being unwound.
    pub debt_token: Address,
    /// Collateral lending token being redeemed.
    pub collateral_token: Address,
    /// Underlying to debt token payload.
    pub call_data: CallData,
}

/// How to unwind the withdrawing share of the vault's debt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwindParams {
    /// Solver handler for the collateral swaps.
    pub handler: Address,
    /// Collateral sizing margin in 1/100_000 units.
    pub collateral_buffer_unit: u64,
    /// Flash sizing margin in 1/10_000 units.
    pub flash_loan_buffer_unit: u64,
    /// One swap per (debt, collateral) pair that may need redeeming.
    pub swaps: Vec<CollateralSwap>,
}

/// A withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Shares to redeem, exit fee included.
    pub shares: U256,
    /// Who receives the payout.
    pub receiver: Address,
    /// `(token, minimum)` floors on the payout.
    pub min_amounts_out: Vec<(Address, U256)>,
    /// Required when the vault carries debt.
    pub unwind: Option<UnwindParams>,
}
