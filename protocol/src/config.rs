//! # Protocol Configuration & Constants
//!
//! Every magic number in Folio lives here. If you're hardcoding a basis-point
//! denominator somewhere else, move it here first.
//!
//! Two buffer-unit scales coexist on purpose and are easy to mix up:
//! flash-loan buffers are in 1/10_000 units, collateral buffers are in
//! 1/100_000 units. The constants below name both.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Denominators
// ---------------------------------------------------------------------------

/// Basis-point denominator. 1 bp = 0.01%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Denominator for flash-loan buffer units (same scale as bps).
pub const FLASH_LOAN_BUFFER_DENOMINATOR: u64 = 10_000;

/// Denominator for collateral buffer units. One unit is 0.001%.
pub const COLLATERAL_BUFFER_DENOMINATOR: u64 = 100_000;

/// USD values are carried with 18 decimals.
pub const USD_DECIMALS: u8 = 18;

/// `10^18`, the fixed-point scale for USD values and per-share values.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Seconds in a (non-leap) year, used for streaming fee accrual.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Fee Caps
// ---------------------------------------------------------------------------

/// Highest annual management fee a vault may configure (10%).
pub const MAX_MANAGEMENT_FEE_BPS: u32 = 1_000;

/// Highest performance fee a vault may configure (50% of gains).
pub const MAX_PERFORMANCE_FEE_BPS: u32 = 5_000;

/// Highest entry or exit fee (5%).
pub const MAX_ENTRY_EXIT_FEE_BPS: u32 = 500;

/// Highest share of every fee the protocol treasury may take (50%).
pub const MAX_PROTOCOL_FEE_CUT_BPS: u32 = 5_000;

/// Time lock between proposing and applying a new fee schedule.
pub const FEE_UPDATE_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// Vault Policy
// ---------------------------------------------------------------------------

/// Longest cooldown a vault may impose between deposit and withdrawal.
pub const MAX_COOLDOWN_PERIOD: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Maximum number of tokens in a basket.
pub const MAX_BASKET_SIZE: usize = 15;

/// Largest collateral buffer accepted in a repay or unwind (5%).
pub const MAX_COLLATERAL_BUFFER_UNIT: u64 = 5_000;

/// Largest flash-loan buffer accepted in a repay or unwind (5%).
pub const MAX_FLASH_LOAN_BUFFER_UNIT: u64 = 500;

// ---------------------------------------------------------------------------
// Lending Defaults
// ---------------------------------------------------------------------------

/// Aave V3's flash-loan premium: 5 bps.
pub const DEFAULT_FLASH_LOAN_PREMIUM_BPS: u32 = 5;

/// Collateral factor applied when a reserve is listed without one (75%).
pub const DEFAULT_COLLATERAL_FACTOR_BPS: u32 = 7_500;

// ---------------------------------------------------------------------------
// Concentrated Liquidity
// ---------------------------------------------------------------------------

/// Lowest tick a concentrated-liquidity position may use.
pub const MIN_TICK: i32 = -887_272;

/// Highest tick a concentrated-liquidity position may use.
pub const MAX_TICK: i32 = 887_272;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_scales_differ_by_ten() {
        assert_eq!(COLLATERAL_BUFFER_DENOMINATOR, FLASH_LOAN_BUFFER_DENOMINATOR * 10);
    }

    #[test]
    fn fee_caps_fit_within_denominator() {
        assert!((MAX_MANAGEMENT_FEE_BPS as u64) < BPS_DENOMINATOR);
        assert!((MAX_PERFORMANCE_FEE_BPS as u64) < BPS_DENOMINATOR);
        assert!((MAX_ENTRY_EXIT_FEE_BPS as u64) < BPS_DENOMINATOR);
        assert!((MAX_PROTOCOL_FEE_CUT_BPS as u64) <= BPS_DENOMINATOR);
    }

    #[test]
    fn buffer_caps_below_denominators() {
        assert!(MAX_COLLATERAL_BUFFER_UNIT < COLLATERAL_BUFFER_DENOMINATOR);
        assert!(MAX_FLASH_LOAN_BUFFER_UNIT < FLASH_LOAN_BUFFER_DENOMINATOR);
    }

    #[test]
    fn wad_matches_usd_decimals() {
        assert_eq!(WAD, 10u128.pow(USD_DECIMALS as u32));
    }

    #[test]
    fn tick_bounds_symmetric() {
        assert_eq!(MIN_TICK, -MAX_TICK);
    }
}
