//! # Portfolio Calculations
//!
//! Pure functions over a [`BasketSnapshot`] and an oracle. Nothing here
//! mutates state or caches prices: the oracle is the single source of truth
//! for the duration of a call.
//!
//! Rounding always favours the vault. Mint amounts and payouts floor;
//! flash-loan and collateral sizing ceil, so an unwind is never undersized.

use folio_protocol::config::{
    BPS_DENOMINATOR, COLLATERAL_BUFFER_DENOMINATOR, FLASH_LOAN_BUFFER_DENOMINATOR,
    MAX_COLLATERAL_BUFFER_UNIT, MAX_FLASH_LOAN_BUFFER_UNIT,
};
use folio_protocol::math::{self, bps_of_up, inflate_up, mul_div, mul_div_up, wad};
use folio_protocol::oracle::PriceOracle;
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::resolver::BasketSnapshot;

/// Gross and net USD18 value of a basket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    /// Value of all holdings.
    pub assets_usd: U256,
    /// Value of all debts.
    pub liabilities_usd: U256,
    /// `assets - liabilities`.
    pub net_usd: U256,
}

/// USD18 value of a list of token amounts. Zero amounts are skipped rather
/// than sent to the oracle.
pub fn value_of(oracle: &dyn PriceOracle, amounts: &[(Address, U256)]) -> Result<U256, VaultError> {
    let mut total = U256::ZERO;
    for (token, amount) in amounts {
        if amount.is_zero() {
            continue;
        }
        total = math::add(total, oracle.convert_to_usd18(*token, *amount)?)?;
    }
    Ok(total)
}

/// Values every holding and subtracts every liability.
pub fn value_basket(oracle: &dyn PriceOracle, snapshot: &BasketSnapshot) -> Result<Valuation, VaultError> {
    let mut assets_usd = U256::ZERO;
    for holding in &snapshot.holdings {
        assets_usd = math::add(assets_usd, value_of(oracle, &holding.underlying)?)?;
    }
    let debts: Vec<(Address, U256)> = snapshot
        .liabilities
        .iter()
        .map(|l| (l.token, l.amount))
        .collect();
    let liabilities_usd = value_of(oracle, &debts)?;
    if liabilities_usd > assets_usd {
        return Err(VaultError::LiabilitiesExceedAssets {
            assets_usd,
            liabilities_usd,
        });
    }
    Ok(Valuation {
        assets_usd,
        liabilities_usd,
        net_usd: math::sub(assets_usd, liabilities_usd)?,
    })
}

/// Net USD18 value of the vault.
pub fn total_vault_value_usd(oracle: &dyn PriceOracle, snapshot: &BasketSnapshot) -> Result<U256, VaultError> {
    Ok(value_basket(oracle, snapshot)?.net_usd)
}

/// Per-share value: `total_value * 1e18 / supply`, zero without supply.
pub fn share_value(total_value: U256, supply: U256) -> Result<U256, VaultError> {
    if supply.is_zero() {
        return Ok(U256::ZERO);
    }
    Ok(mul_div(total_value, wad(), supply)?)
}

/// Shares to mint for a deposit worth `deposit_value`, before fees.
///
/// The first deposit mints `initial_amount`. Later deposits mint
/// `deposit_value * supply / total_value`, floored.
pub fn mint_amount(
    deposit_value: U256,
    total_value: U256,
    supply: U256,
    initial_amount: U256,
) -> Result<U256, VaultError> {
    if deposit_value.is_zero() {
        return Err(VaultError::ZeroDepositValue);
    }
    if supply.is_zero() {
        return Ok(initial_amount);
    }
    if total_value.is_zero() {
        return Err(VaultError::ZeroVaultValue);
    }
    Ok(mul_div(deposit_value, supply, total_value)?)
}

/// Pro-rata payout of every basket token for `shares` out of `supply`.
///
/// Each token is floored independently; the dust stays in the vault.
pub fn withdrawal_amounts(
    snapshot: &BasketSnapshot,
    shares: U256,
    supply: U256,
) -> Result<Vec<(Address, U256)>, VaultError> {
    if shares > supply {
        return Err(VaultError::InsufficientShares {
            holder: snapshot.vault,
            balance: supply,
            requested: shares,
        });
    }
    snapshot
        .holdings
        .iter()
        .map(|h| Ok((h.token, mul_div(h.amount, shares, supply)?)))
        .collect()
}

/// Checks both buffer units against their caps.
pub fn validate_buffers(collateral_buffer_unit: u64, flash_loan_buffer_unit: u64) -> Result<(), VaultError> {
    if collateral_buffer_unit > MAX_COLLATERAL_BUFFER_UNIT {
        return Err(VaultError::BufferTooLarge {
            which: "collateral",
            value: collateral_buffer_unit,
            max: MAX_COLLATERAL_BUFFER_UNIT,
        });
    }
    if flash_loan_buffer_unit > MAX_FLASH_LOAN_BUFFER_UNIT {
        return Err(VaultError::BufferTooLarge {
            which: "flash loan",
            value: flash_loan_buffer_unit,
            max: MAX_FLASH_LOAN_BUFFER_UNIT,
        });
    }
    Ok(())
}

/// Flash-loan plan for unwinding one debt on a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwindSizing {
    /// Debt attributable to the withdrawing shares, rounded up.
    pub debt_share: U256,
    /// Flash-loan principal: `debt_share` inflated by the flash buffer.
    pub flash_loan_amount: U256,
    /// Premium the pool will charge.
    pub premium: U256,
    /// `flash_loan_amount + premium`.
    pub amount_owed: U256,
    /// Collateral buffer to apply when sizing redemptions (1/100_000 units).
    pub collateral_buffer_unit: u64,
}

/// Sizes the flash loan for repaying `shares / supply` of `debt`.
///
/// The flash amount is never below the debt share: the share is rounded up
/// and then inflated by `flash_loan_buffer_unit / 10_000`.
pub fn flash_loan_sizing_for_unwind(
    debt: U256,
    shares: U256,
    supply: U256,
    premium_bps: u32,
    collateral_buffer_unit: u64,
    flash_loan_buffer_unit: u64,
) -> Result<UnwindSizing, VaultError> {
    validate_buffers(collateral_buffer_unit, flash_loan_buffer_unit)?;
    let debt_share = mul_div_up(debt, shares, supply)?;
    let flash_loan_amount = inflate_up(debt_share, flash_loan_buffer_unit, FLASH_LOAN_BUFFER_DENOMINATOR)?;
    let premium = bps_of_up(flash_loan_amount, premium_bps)?;
    Ok(UnwindSizing {
        debt_share,
        flash_loan_amount,
        premium,
        amount_owed: math::add(flash_loan_amount, premium)?,
        collateral_buffer_unit,
    })
}

/// Minimum flash amount covering `repay_total` plus the premium:
/// `ceil(repay_total * (10_000 + premium_bps) / 10_000)`.
pub fn min_flash_loan_for_repay(repay_total: U256, premium_bps: u32) -> Result<U256, VaultError> {
    Ok(inflate_up(repay_total, premium_bps as u64, BPS_DENOMINATOR)?)
}

/// A collateral lending token that can be redeemed to cover a flash loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralSource {
    /// Lending token.
    pub lending_token: Address,
    /// Its underlying.
    pub underlying: Address,
    /// How much of it may be redeemed.
    pub available: U256,
}

/// Splits `target_usd` across `sources` pro rata to their value and returns
/// the lending-token amount to redeem from each, inflated by
/// `buffer_unit / 100_000` and rounded up.
pub fn collateral_to_sell(
    oracle: &dyn PriceOracle,
    sources: &[CollateralSource],
    target_usd: U256,
    buffer_unit: u64,
) -> Result<Vec<(Address, U256)>, VaultError> {
    if target_usd.is_zero() {
        return Ok(Vec::new());
    }
    let mut values = Vec::with_capacity(sources.len());
    for source in sources {
        let value = if source.available.is_zero() {
            U256::ZERO
        } else {
            oracle.convert_to_usd18(source.underlying, source.available)?
        };
        values.push(value);
    }
    let total = math::sum(values.iter().copied())?;
    if total.is_zero() {
        let token = sources.first().map(|s| s.lending_token).unwrap_or(Address::ZERO);
        return Err(VaultError::UnwindExceedsCollateralShare {
            token,
            required: target_usd,
            available: U256::ZERO,
        });
    }

    let mut plan = Vec::with_capacity(sources.len());
    for (source, value) in sources.iter().zip(values) {
        if value.is_zero() {
            continue;
        }
        let portion_usd = mul_div_up(target_usd, value, total)?;
        let raw = oracle.usd18_to_token(source.underlying, portion_usd)?;
        let amount = inflate_up(raw, buffer_unit, COLLATERAL_BUFFER_DENOMINATOR)?;
        if amount > source.available {
            return Err(VaultError::UnwindExceedsCollateralShare {
                token: source.lending_token,
                required: amount,
                available: source.available,
            });
        }
        plan.push((source.lending_token, amount));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Liability, ResolvedPosition};
    use chrono::Utc;
    use folio_protocol::address::label;
    use folio_protocol::oracle::StaticPriceOracle;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn snapshot(holdings: &[(&str, u64)], liabilities: &[(&str, u64)]) -> BasketSnapshot {
        BasketSnapshot {
            vault: label("vault"),
            taken_at: Utc::now(),
            holdings: holdings
                .iter()
                .map(|(name, amount)| ResolvedPosition {
                    token: label(name),
                    amount: u(*amount),
                    underlying: vec![(label(name), u(*amount))],
                })
                .collect(),
            liabilities: liabilities
                .iter()
                .map(|(name, amount)| Liability {
                    pool: label("aave"),
                    token: label(name),
                    amount: u(*amount),
                })
                .collect(),
        }
    }

    /// Zero-decimal tokens: A at $1, B at $2.
    fn oracle() -> StaticPriceOracle {
        StaticPriceOracle::new()
            .with_price(label("A"), 0, wad())
            .with_price(label("B"), 0, wad() * u(2))
    }

    #[test]
    fn value_subtracts_liabilities() {
        let snap = snapshot(&[("A", 100), ("B", 10)], &[("A", 30)]);
        let v = value_basket(&oracle(), &snap).unwrap();
        assert_eq!(v.assets_usd, wad() * u(120));
        assert_eq!(v.liabilities_usd, wad() * u(30));
        assert_eq!(v.net_usd, wad() * u(90));
    }

    #[test]
    fn zero_holdings_are_not_priced() {
        // "C" has no feed; a zero balance must not reach the oracle.
        let snap = snapshot(&[("A", 5), ("C", 0)], &[]);
        assert_eq!(total_vault_value_usd(&oracle(), &snap).unwrap(), wad() * u(5));
    }

    #[test]
    fn insolvent_basket_is_an_error() {
        let snap = snapshot(&[("A", 10)], &[("A", 11)]);
        assert!(matches!(
            value_basket(&oracle(), &snap),
            Err(VaultError::LiabilitiesExceedAssets { .. })
        ));
    }

    #[test]
    fn mint_amount_scenario() {
        // 100 shares worth 100; deposit worth 10 mints 10.
        let minted = mint_amount(wad() * u(10), wad() * u(100), u(100), u(1)).unwrap();
        assert_eq!(minted, u(10));
        // First deposit mints the initial amount regardless of value.
        assert_eq!(mint_amount(wad(), U256::ZERO, U256::ZERO, u(1_000)).unwrap(), u(1_000));
        // Floors.
        assert_eq!(mint_amount(u(7), u(20), u(3), u(1)).unwrap(), u(1));
        assert!(matches!(
            mint_amount(U256::ZERO, u(1), u(1), u(1)),
            Err(VaultError::ZeroDepositValue)
        ));
    }

    #[test]
    fn withdrawal_amounts_floor_per_token() {
        let snap = snapshot(&[("A", 10), ("B", 7)], &[]);
        let out = withdrawal_amounts(&snap, u(1), u(3)).unwrap();
        assert_eq!(out, vec![(label("A"), u(3)), (label("B"), u(2))]);
    }

    #[test]
    fn withdrawal_proportionality() {
        let snap = snapshot(&[("A", 1_000_003), ("B", 999_999)], &[]);
        let supply = u(1_000);
        let small = withdrawal_amounts(&snap, u(10), supply).unwrap();
        let large = withdrawal_amounts(&snap, u(30), supply).unwrap();
        for ((_, s), (_, l)) in small.iter().zip(large.iter()) {
            // l ~= 3 * s within one unit per flooring.
            let diff = if *l > *s * u(3) { *l - *s * u(3) } else { *s * u(3) - *l };
            assert!(diff <= u(3));
        }
    }

    #[test]
    fn unwind_sizing_never_below_debt_share() {
        // 1/3 of 1000 debt = 333.33 -> 334; 0.1% buffer -> 334.334 -> 335.
        let sizing = flash_loan_sizing_for_unwind(u(1_000), u(1), u(3), 5, 100, 10).unwrap();
        assert_eq!(sizing.debt_share, u(334));
        assert_eq!(sizing.flash_loan_amount, u(335));
        assert_eq!(sizing.premium, u(1));
        assert_eq!(sizing.amount_owed, u(336));
        assert!(sizing.flash_loan_amount >= sizing.debt_share);
    }

    #[test]
    fn buffer_caps_enforced() {
        assert!(matches!(
            flash_loan_sizing_for_unwind(u(1), u(1), u(1), 5, MAX_COLLATERAL_BUFFER_UNIT + 1, 0),
            Err(VaultError::BufferTooLarge { .. })
        ));
        assert!(validate_buffers(0, MAX_FLASH_LOAN_BUFFER_UNIT + 1).is_err());
        assert!(validate_buffers(MAX_COLLATERAL_BUFFER_UNIT, MAX_FLASH_LOAN_BUFFER_UNIT).is_ok());
    }

    #[test]
    fn min_flash_for_repay_includes_premium() {
        assert_eq!(min_flash_loan_for_repay(u(10_000), 5).unwrap(), u(10_005));
        assert_eq!(min_flash_loan_for_repay(u(1), 5).unwrap(), u(2));
    }

    #[test]
    fn collateral_split_pro_rata_with_buffer() {
        let sources = [
            CollateralSource {
                lending_token: label("aA"),
                underlying: label("A"),
                available: u(300),
            },
            CollateralSource {
                lending_token: label("aB"),
                underlying: label("B"),
                available: u(50),
            },
        ];
        // A worth $300, B worth $100; cover $40 -> $30 of A, $10 of B (5 units).
        let plan = collateral_to_sell(&oracle(), &sources, wad() * u(40), 0).unwrap();
        assert_eq!(plan, vec![(label("aA"), u(30)), (label("aB"), u(5))]);
        // 1% collateral buffer (1000 / 100_000).
        let plan = collateral_to_sell(&oracle(), &sources, wad() * u(40), 1_000).unwrap();
        assert_eq!(plan, vec![(label("aA"), u(31)), (label("aB"), u(6))]);
    }

    #[test]
    fn collateral_beyond_available_rejected() {
        let sources = [CollateralSource {
            lending_token: label("aA"),
            underlying: label("A"),
            available: u(10),
        }];
        assert!(matches!(
            collateral_to_sell(&oracle(), &sources, wad() * u(11), 0),
            Err(VaultError::UnwindExceedsCollateralShare { .. })
        ));
    }
}
