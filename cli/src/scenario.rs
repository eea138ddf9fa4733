//! # Scenario Files
//!
//! A scenario is a TOML document describing a market (tokens with prices,
//! funded holders, an optional fixed-rate router), one vault, and a script
//! of steps to run against it. Every participant is named by a label that
//! maps to a derived address.
//!
//! Amounts and prices are decimal strings in whole units (`"1.5"` of an
//! 18-decimal token is `1.5e18` base units). Share amounts always carry 18
//! decimals.
//!
//! ```toml
//! start = "2026-01-01T00:00:00Z"
//!
//! [[tokens]]
//! symbol = "DAI"
//! decimals = 18
//! price = "1"
//!
//! [[holders]]
//! label = "alice"
//! balances = { DAI = "1000" }
//!
//! [vault]
//! name = "Folio Stable"
//! symbol = "FST"
//! tokens = ["DAI"]
//!
//! [[steps]]
//! action = "deposit"
//! holder = "alice"
//! amounts = { DAI = "100" }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, Utc};
use folio_contracts::fees::FeeSchedule;
use folio_protocol::math::pow10;
use folio_protocol::U256;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Decimals of vault shares.
pub const SHARE_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Ledger clock at the start.
    pub start: DateTime<Utc>,
    /// Tokens in the market.
    pub tokens: Vec<TokenSpec>,
    /// Accounts funded before the first step.
    #[serde(default)]
    pub holders: Vec<HolderSpec>,
    /// Swap router used by `rebalance` steps.
    #[serde(default)]
    pub router: Option<RouterSpec>,
    /// The vault under test.
    pub vault: VaultSpec,
    /// Script, run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenSpec {
    pub symbol: String,
    pub decimals: u8,
    /// USD price of one whole token.
    pub price: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HolderSpec {
    pub label: String,
    /// Starting balances by token symbol.
    #[serde(default)]
    pub balances: BTreeMap<String, String>,
}

/// A zero-slippage router quoting at oracle prices.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSpec {
    #[serde(default = "default_router_label")]
    pub label: String,
    /// Fee taken from every output.
    #[serde(default)]
    pub fee_bps: u32,
    /// Whole units of every token the router can pay out.
    #[serde(default = "default_router_liquidity")]
    pub liquidity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultSpec {
    #[serde(default = "default_vault_label")]
    pub label: String,
    pub name: String,
    pub symbol: String,
    /// Basket, by token symbol.
    pub tokens: Vec<String>,
    /// Shares minted by the first deposit.
    #[serde(default = "default_initial_amount")]
    pub initial_portfolio_amount: String,
    #[serde(default = "zero")]
    pub min_portfolio_token_holding: String,
    #[serde(default)]
    pub cooldown_period_secs: u64,
    #[serde(default)]
    pub fees: FeeSpec,
    #[serde(default = "default_admin")]
    pub admin: String,
    #[serde(default = "default_manager")]
    pub asset_manager: String,
    #[serde(default = "default_treasury")]
    pub treasury: String,
}

/// Fee rates in bps; omitted rates are zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeeSpec {
    pub management_fee_bps: u32,
    pub performance_fee_bps: u32,
    pub entry_fee_bps: u32,
    pub exit_fee_bps: u32,
}

impl From<FeeSpec> for FeeSchedule {
    fn from(spec: FeeSpec) -> Self {
        FeeSchedule {
            management_fee_bps: spec.management_fee_bps,
            performance_fee_bps: spec.performance_fee_bps,
            entry_fee_bps: spec.entry_fee_bps,
            exit_fee_bps: spec.exit_fee_bps,
        }
    }
}

/// One scripted action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Deposit {
        holder: String,
        amounts: BTreeMap<String, String>,
        /// Minimum net shares.
        #[serde(default)]
        min_shares: Option<String>,
    },
    Withdraw {
        holder: String,
        /// Share amount, or `"all"`.
        shares: String,
        /// Defaults to the holder.
        #[serde(default)]
        receiver: Option<String>,
    },
    Advance {
        #[serde(default)]
        days: i64,
        #[serde(default)]
        seconds: i64,
    },
    ChargeFees,
    SetPrice {
        token: String,
        price: String,
    },
    Rebalance {
        /// New basket.
        tokens: Vec<String>,
        #[serde(default)]
        swaps: Vec<SwapSpec>,
    },
}

impl Step {
    /// Action name as written in the file.
    pub fn action(&self) -> &'static str {
        match self {
            Step::Deposit { .. } => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::Advance { .. } => "advance",
            Step::ChargeFees => "charge_fees",
            Step::SetPrice { .. } => "set_price",
            Step::Rebalance { .. } => "rebalance",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapSpec {
    pub sell: String,
    pub amount: String,
    pub buy: String,
    #[serde(default = "zero")]
    pub min_output: String,
}

fn default_router_label() -> String {
    "router".into()
}

fn default_router_liquidity() -> String {
    "1000000000".into()
}

fn default_vault_label() -> String {
    "vault".into()
}

fn default_initial_amount() -> String {
    "1000".into()
}

fn default_admin() -> String {
    "admin".into()
}

fn default_manager() -> String {
    "manager".into()
}

fn default_treasury() -> String {
    "treasury".into()
}

fn zero() -> String {
    "0".into()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Scenario {
    /// Reads and validates a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Scenario =
            toml::from_str(&raw).with_context(|| format!("failed to parse scenario {}", path.display()))?;
        scenario
            .validate()
            .with_context(|| format!("invalid scenario {}", path.display()))?;
        Ok(scenario)
    }

    /// Decimals of a token by symbol.
    pub fn decimals(&self, symbol: &str) -> Result<u8> {
        match self.tokens.iter().find(|t| t.symbol == symbol) {
            Some(token) => Ok(token.decimals),
            None => bail!("unknown token {symbol:?}"),
        }
    }

    /// Checks every cross-reference and amount before anything runs.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.tokens.is_empty(), "scenario lists no tokens");
        let mut symbols = BTreeSet::new();
        for token in &self.tokens {
            ensure!(symbols.insert(token.symbol.as_str()), "token {:?} listed twice", token.symbol);
            ensure!(token.decimals <= 36, "token {:?} has {} decimals", token.symbol, token.decimals);
            let price = parse_units(&token.price, SHARE_DECIMALS)
                .with_context(|| format!("price of {}", token.symbol))?;
            ensure!(!price.is_zero(), "token {:?} has a zero price", token.symbol);
        }

        for holder in &self.holders {
            for (symbol, amount) in &holder.balances {
                parse_units(amount, self.decimals(symbol)?)
                    .with_context(|| format!("balance of {} for {}", symbol, holder.label))?;
            }
        }
        if let Some(router) = &self.router {
            parse_units(&router.liquidity, 0).context("router liquidity")?;
        }

        for symbol in &self.vault.tokens {
            self.decimals(symbol).context("vault basket")?;
        }
        parse_units(&self.vault.initial_portfolio_amount, SHARE_DECIMALS).context("initial_portfolio_amount")?;
        parse_units(&self.vault.min_portfolio_token_holding, SHARE_DECIMALS)
            .context("min_portfolio_token_holding")?;

        for (i, step) in self.steps.iter().enumerate() {
            self.validate_step(step)
                .with_context(|| format!("step {} ({})", i + 1, step.action()))?;
        }
        Ok(())
    }

    fn validate_step(&self, step: &Step) -> Result<()> {
        match step {
            Step::Deposit { amounts, min_shares, .. } => {
                ensure!(!amounts.is_empty(), "deposit lists no amounts");
                for (symbol, amount) in amounts {
                    parse_units(amount, self.decimals(symbol)?)?;
                }
                if let Some(min) = min_shares {
                    parse_units(min, SHARE_DECIMALS)?;
                }
            }
            Step::Withdraw { shares, .. } => {
                if shares != "all" {
                    parse_units(shares, SHARE_DECIMALS)?;
                }
            }
            Step::Advance { days, seconds } => {
                ensure!(*days >= 0 && *seconds >= 0, "time only moves forward");
            }
            Step::ChargeFees => {}
            Step::SetPrice { token, price } => {
                self.decimals(token)?;
                ensure!(!parse_units(price, SHARE_DECIMALS)?.is_zero(), "zero price");
            }
            Step::Rebalance { tokens, swaps } => {
                ensure!(
                    swaps.is_empty() || self.router.is_some(),
                    "swaps need a [router] section"
                );
                for symbol in tokens {
                    self.decimals(symbol)?;
                }
                for swap in swaps {
                    parse_units(&swap.amount, self.decimals(&swap.sell)?)?;
                    parse_units(&swap.min_output, self.decimals(&swap.buy)?)?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Parses a non-negative decimal string into base units.
pub fn parse_units(value: &str, decimals: u8) -> Result<U256> {
    let parsed = Decimal::from_str(value.trim()).with_context(|| format!("invalid amount {value:?}"))?;
    ensure!(!parsed.is_sign_negative(), "amount {value:?} is negative");
    let parsed = parsed.normalize();
    let scale = parsed.scale();
    ensure!(
        scale <= u32::from(decimals),
        "amount {value:?} has more than {decimals} decimal places"
    );
    let mantissa = U256::from(parsed.mantissa().unsigned_abs());
    let factor = pow10(decimals - scale as u8)?;
    mantissa
        .checked_mul(factor)
        .with_context(|| format!("amount {value:?} overflows"))
}

/// Renders base units as a decimal string without trailing zeros.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let places = decimals as usize;
    if places == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = places + 1);
    let (whole, fraction) = padded.split_at(padded.len() - places);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}
