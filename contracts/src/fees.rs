//! # Fee Accrual
//!
//! All vault fees are paid in freshly minted or transferred shares:
//!
//! - **Management** streams with time:
//!   `supply * bps * elapsed / (SECONDS_PER_YEAR * 10_000)`.
//! - **Performance** is charged only above the high-water mark:
//!   `(value - hwm) * supply * bps / (value * 10_000)`.
//! - **Entry / exit** take a flat cut of the shares being minted or burned.
//!
//! Every fee is then split between the protocol treasury and the vault
//! treasury according to [`ProtocolFeeConfig::cut_bps`].
//!
//! Fee mints dilute existing holders proportionally. That is the point.

use chrono::{DateTime, Utc};
use folio_protocol::config::{
    BPS_DENOMINATOR, MAX_ENTRY_EXIT_FEE_BPS, MAX_MANAGEMENT_FEE_BPS, MAX_PERFORMANCE_FEE_BPS,
    MAX_PROTOCOL_FEE_CUT_BPS, SECONDS_PER_YEAR,
};
use folio_protocol::math::{self, bps_of, mul_div, MathError};
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A vault's fee rates, all in basis points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Annual management fee.
    pub management_fee_bps: u32,
    /// Share of gains above the high-water mark.
    pub performance_fee_bps: u32,
    /// Cut of minted shares on deposit.
    pub entry_fee_bps: u32,
    /// Cut of burned shares on withdrawal.
    pub exit_fee_bps: u32,
}

impl FeeSchedule {
    /// Checks every rate against its cap.
    pub fn validate(&self) -> Result<(), VaultError> {
        let checks = [
            ("management", self.management_fee_bps, MAX_MANAGEMENT_FEE_BPS),
            ("performance", self.performance_fee_bps, MAX_PERFORMANCE_FEE_BPS),
            ("entry", self.entry_fee_bps, MAX_ENTRY_EXIT_FEE_BPS),
            ("exit", self.exit_fee_bps, MAX_ENTRY_EXIT_FEE_BPS),
        ];
        for (name, value, max) in checks {
            if value > max {
                return Err(VaultError::InvalidConfig(format!(
                    "{name} fee {value} bps exceeds cap of {max} bps"
                )));
            }
        }
        Ok(())
    }
}

/// Protocol-wide cut of every vault fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolFeeConfig {
    /// Share of each fee routed to the protocol, in bps.
    pub cut_bps: u32,
    /// Receiver of the protocol's share.
    pub treasury: Address,
}

impl Default for ProtocolFeeConfig {
    fn default() -> Self {
        Self {
            cut_bps: 0,
            treasury: Address::ZERO,
        }
    }
}

impl ProtocolFeeConfig {
    /// Checks the cut against its cap and that a treasury is set when needed.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.cut_bps > MAX_PROTOCOL_FEE_CUT_BPS {
            return Err(VaultError::InvalidConfig(format!(
                "protocol fee cut {} bps exceeds cap of {MAX_PROTOCOL_FEE_CUT_BPS} bps",
                self.cut_bps
            )));
        }
        if self.cut_bps > 0 && self.treasury == Address::ZERO {
            return Err(VaultError::InvalidConfig(
                "protocol fee cut requires a treasury".into(),
            ));
        }
        Ok(())
    }

    /// Splits `fee` into `(protocol, vault)` shares. The protocol's part is
    /// floored; the remainder goes to the vault.
    pub fn split(&self, fee: U256) -> Result<FeeSplit, MathError> {
        let protocol = bps_of(fee, self.cut_bps)?;
        Ok(FeeSplit {
            protocol,
            vault: math::sub(fee, protocol)?,
        })
    }
}

/// A fee divided between treasuries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Protocol treasury's share.
    pub protocol: U256,
    /// Vault treasury's share.
    pub vault: U256,
}

impl FeeSplit {
    /// Total of both parts.
    pub fn total(&self) -> Result<U256, MathError> {
        math::add(self.protocol, self.vault)
    }
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Streaming management fee for `elapsed_secs`, floored.
pub fn management_fee_shares(supply: U256, fee_bps: u32, elapsed_secs: u64) -> Result<U256, MathError> {
    let numerator = U256::from(fee_bps)
        .checked_mul(U256::from(elapsed_secs))
        .ok_or(MathError::Overflow)?;
    let denominator = U256::from(SECONDS_PER_YEAR)
        .checked_mul(U256::from(BPS_DENOMINATOR))
        .ok_or(MathError::Overflow)?;
    mul_div(supply, numerator, denominator)
}

/// Performance fee shares for a per-share value above the high-water mark.
/// Zero when `share_value <= high_water_mark`.
pub fn performance_fee_shares(
    share_value: U256,
    high_water_mark: U256,
    supply: U256,
    fee_bps: u32,
) -> Result<U256, MathError> {
    if share_value <= high_water_mark || fee_bps == 0 {
        return Ok(U256::ZERO);
    }
    let gain = math::sub(share_value, high_water_mark)?;
    let numerator = gain
        .checked_mul(supply)
        .ok_or(MathError::Overflow)?;
    let denominator = share_value
        .checked_mul(U256::from(BPS_DENOMINATOR))
        .ok_or(MathError::Overflow)?;
    mul_div(numerator, U256::from(fee_bps), denominator)
}

/// Splits `shares` into `(net, fee)` with
/// `net = floor(shares * (10_000 - bps) / 10_000)`.
pub fn apply_flat_fee(shares: U256, fee_bps: u32) -> Result<(U256, U256), MathError> {
    let keep_bps = U256::from(BPS_DENOMINATOR).saturating_sub(U256::from(fee_bps));
    let net = mul_div(shares, keep_bps, U256::from(BPS_DENOMINATOR))?;
    Ok((net, math::sub(shares, net)?))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Per-vault fee bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    /// Last time the management fee was successfully charged.
    pub last_charge: DateTime<Utc>,
    /// Highest per-share value seen (USD18 scaled by 1e18). Never decreases.
    pub high_water_mark: U256,
}

impl FeeState {
    /// Fresh state starting at `now` with no high-water mark.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_charge: now,
            high_water_mark: U256::ZERO,
        }
    }

    /// Management fee shares due at `now`.
    ///
    /// With nothing to accrue (zero supply or zero rate) the timestamp
    /// advances. When the computed fee rounds to zero it stays put, so short
    /// intervals keep accumulating instead of being forgiven.
    pub fn accrue_management(
        &mut self,
        now: DateTime<Utc>,
        supply: U256,
        fee_bps: u32,
    ) -> Result<U256, MathError> {
        if supply.is_zero() || fee_bps == 0 {
            self.last_charge = self.last_charge.max(now);
            return Ok(U256::ZERO);
        }
        let elapsed = (now - self.last_charge).num_seconds().max(0) as u64;
        let shares = management_fee_shares(supply, fee_bps, elapsed)?;
        if !shares.is_zero() {
            self.last_charge = now;
        }
        Ok(shares)
    }

    /// Performance fee shares at `share_value`; ratchets the high-water mark.
    pub fn accrue_performance(
        &mut self,
        share_value: U256,
        supply: U256,
        fee_bps: u32,
    ) -> Result<U256, MathError> {
        let shares = performance_fee_shares(share_value, self.high_water_mark, supply, fee_bps)?;
        self.ratchet(share_value);
        Ok(shares)
    }

    /// Raises the high-water mark to `share_value` if higher.
    pub fn ratchet(&mut self, share_value: U256) {
        if share_value > self.high_water_mark {
            self.high_water_mark = share_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use folio_protocol::math::wad;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn management_fee_full_year() {
        // 2% of 1,000,000 shares over a year.
        let shares = management_fee_shares(u(1_000_000), 200, SECONDS_PER_YEAR).unwrap();
        assert_eq!(shares, u(20_000));
    }

    #[test]
    fn management_timestamp_rule() {
        let mut state = FeeState::new(t0());

        // Zero supply: nothing to accrue, clock advances.
        let shares = state.accrue_management(t0() + Duration::days(1), U256::ZERO, 200).unwrap();
        assert!(shares.is_zero());
        assert_eq!(state.last_charge, t0() + Duration::days(1));

        // Rounds to zero: clock stays.
        let shares = state.accrue_management(t0() + Duration::days(2), u(100), 200).unwrap();
        assert!(shares.is_zero());
        assert_eq!(state.last_charge, t0() + Duration::days(1));

        // Enough time for a whole share: clock advances.
        let later = t0() + Duration::days(1) + Duration::seconds(SECONDS_PER_YEAR as i64);
        let shares = state.accrue_management(later, u(100), 200).unwrap();
        assert_eq!(shares, u(2));
        assert_eq!(state.last_charge, later);
    }

    #[test]
    fn performance_fee_above_mark_only() {
        let hwm = wad();
        // Value rose 10%: fee = 0.1 * 1000 * 0.2 / 1.1 = 18.18 -> 18.
        let value = wad() * u(11) / u(10);
        assert_eq!(performance_fee_shares(value, hwm, u(1_000), 2_000).unwrap(), u(18));
        assert!(performance_fee_shares(hwm, hwm, u(1_000), 2_000).unwrap().is_zero());
        assert!(performance_fee_shares(wad() / u(2), hwm, u(1_000), 2_000).unwrap().is_zero());
    }

    #[test]
    fn high_water_mark_never_decreases() {
        let mut state = FeeState::new(t0());
        state.accrue_performance(wad() * u(2), u(10), 1_000).unwrap();
        assert_eq!(state.high_water_mark, wad() * u(2));
        state.accrue_performance(wad(), u(10), 1_000).unwrap();
        assert_eq!(state.high_water_mark, wad() * u(2));
    }

    #[test]
    fn flat_fee_matches_entry_scenario() {
        // 10 shares at 1% -> 9.9 floored to 9 net, 1 fee.
        assert_eq!(apply_flat_fee(u(10), 100).unwrap(), (u(9), u(1)));
        assert_eq!(apply_flat_fee(u(10), 0).unwrap(), (u(10), U256::ZERO));
    }

    #[test]
    fn protocol_split_floors_protocol_side() {
        let config = ProtocolFeeConfig {
            cut_bps: 2_500,
            treasury: Address::repeat_byte(1),
        };
        let split = config.split(u(7)).unwrap();
        assert_eq!(split, FeeSplit { protocol: u(1), vault: u(6) });
        assert_eq!(split.total().unwrap(), u(7));
    }

    #[test]
    fn caps_enforced() {
        let schedule = FeeSchedule {
            performance_fee_bps: MAX_PERFORMANCE_FEE_BPS + 1,
            ..FeeSchedule::default()
        };
        assert!(schedule.validate().is_err());
        let config = ProtocolFeeConfig {
            cut_bps: 100,
            treasury: Address::ZERO,
        };
        assert!(config.validate().is_err());
    }
}
