//! # Scenario Simulation
//!
//! Builds a ledger, an oracle, a router and a vault from a [`Scenario`] and
//! runs its steps one by one. A step the vault rejects is recorded with its
//! error kind and the run continues, unless `fail_fast` is set. Rejected
//! steps leave no trace on the ledger or the vault.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use folio_contracts::config::{PortfolioConfig, Roles, WhitelistPolicy};
use folio_contracts::fees::FeeSplit;
use folio_contracts::intent::{DepositRequest, RebalanceIntent, SwapLeg, WithdrawRequest};
use folio_contracts::position::Position;
use folio_contracts::{ExecutionContext, Portfolio, RebalancingEngine, VaultError};
use folio_protocol::address::label;
use folio_protocol::math::pow10;
use folio_protocol::oracle::StaticPriceOracle;
use folio_protocol::solver::{RouteInstruction, RouterHandler};
use folio_protocol::{Address, Ledger, U256};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::logging::step_span;
use crate::scenario::{format_units, parse_units, RouterSpec, Scenario, Step, SHARE_DECIMALS};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Vault name and symbol.
    pub vault: String,
    /// One entry per executed step.
    pub steps: Vec<StepOutcome>,
    /// Vault state after the last step.
    pub summary: VaultSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// 1-based position in the script.
    pub index: usize,
    pub action: &'static str,
    /// Ledger time when the step ran.
    pub at: DateTime<Utc>,
    pub result: StepResult,
}

/// What one step did. Amounts are decimal strings in whole units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepResult {
    Deposited {
        holder: String,
        shares_minted: String,
        entry_fee_shares: String,
        value_usd: String,
    },
    Withdrawn {
        holder: String,
        shares_burned: String,
        exit_fee_shares: String,
        received: BTreeMap<String, String>,
    },
    Advanced {
        to: DateTime<Utc>,
    },
    FeesCharged {
        management_shares: String,
        performance_shares: String,
    },
    PriceSet {
        token: String,
        price_usd: String,
    },
    Rebalanced {
        tokens: Vec<String>,
        value_before_usd: String,
        value_after_usd: String,
        removed: Vec<String>,
    },
    /// The vault rejected the step and nothing changed.
    Failed {
        kind: String,
        error: String,
    },
}

/// End-of-run vault state.
#[derive(Debug, Clone, Serialize)]
pub struct VaultSummary {
    pub total_supply: String,
    pub net_value_usd: String,
    pub share_value_usd: String,
    pub high_water_mark_usd: String,
    /// Basket balances by symbol.
    pub holdings: BTreeMap<String, String>,
    /// Share balances by holder label.
    pub holders: BTreeMap<String, String>,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Deposited {
                holder,
                shares_minted,
                entry_fee_shares,
                value_usd,
            } => write!(
                f,
                "{holder} deposited ${value_usd} for {shares_minted} shares (entry fee {entry_fee_shares})"
            ),
            StepResult::Withdrawn {
                holder,
                shares_burned,
                exit_fee_shares,
                received,
            } => {
                write!(f, "{holder} burned {shares_burned} shares (exit fee {exit_fee_shares}) for")?;
                for (symbol, amount) in received {
                    write!(f, " {amount} {symbol}")?;
                }
                Ok(())
            }
            StepResult::Advanced { to } => write!(f, "clock at {to}"),
            StepResult::FeesCharged {
                management_shares,
                performance_shares,
            } => write!(
                f,
                "minted {management_shares} management and {performance_shares} performance fee shares"
            ),
            StepResult::PriceSet { token, price_usd } => write!(f, "{token} priced at ${price_usd}"),
            StepResult::Rebalanced {
                tokens,
                value_before_usd,
                value_after_usd,
                removed,
            } => {
                write!(
                    f,
                    "basket [{}], value ${value_before_usd} -> ${value_after_usd}",
                    tokens.join(", ")
                )?;
                if !removed.is_empty() {
                    write!(f, ", removed [{}]", removed.join(", "))?;
                }
                Ok(())
            }
            StepResult::Failed { kind, error } => write!(f, "FAILED ({kind}): {error}"),
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.vault)?;
        for step in &self.steps {
            writeln!(
                f,
                "  #{:<3} {}  {:<12} {}",
                step.index,
                step.at.format("%Y-%m-%d %H:%M:%S"),
                step.action,
                step.result
            )?;
        }
        let s = &self.summary;
        writeln!(f)?;
        writeln!(f, "  supply       {}", s.total_supply)?;
        writeln!(f, "  net value    ${}", s.net_value_usd)?;
        writeln!(f, "  share value  ${}", s.share_value_usd)?;
        writeln!(f, "  high water   ${}", s.high_water_mark_usd)?;
        for (symbol, amount) in &s.holdings {
            writeln!(f, "  holds        {amount} {symbol}")?;
        }
        for (holder, shares) in &s.holders {
            writeln!(f, "  holder       {holder}: {shares}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TokenInfo {
    address: Address,
    decimals: u8,
    price: U256,
}

/// A scenario wired to a live ledger and vault.
pub struct Simulation {
    scenario: Scenario,
    ledger: Ledger,
    oracle: StaticPriceOracle,
    ctx: ExecutionContext,
    vault: Portfolio,
    tokens: BTreeMap<String, TokenInfo>,
    names: BTreeMap<Address, String>,
}

impl Simulation {
    /// Sets up the market, funds holders and creates the vault.
    pub fn new(scenario: Scenario) -> Result<Self> {
        let mut ledger = Ledger::new(scenario.start);
        let mut oracle = StaticPriceOracle::new();
        let mut tokens = BTreeMap::new();
        for spec in &scenario.tokens {
            let address = label(&spec.symbol);
            ledger
                .tokens
                .register(address, &spec.symbol, spec.decimals)
                .with_context(|| format!("registering {}", spec.symbol))?;
            let price = parse_units(&spec.price, SHARE_DECIMALS)?;
            oracle.set_price(address, spec.decimals, price);
            tokens.insert(
                spec.symbol.clone(),
                TokenInfo {
                    address,
                    decimals: spec.decimals,
                    price,
                },
            );
        }

        let mut ctx = ExecutionContext::new(Arc::new(oracle.clone()));
        for info in tokens.values() {
            ctx.assets.register(&ledger, Position::PlainToken { token: info.address })?;
        }

        let mut names = BTreeMap::new();
        for holder in &scenario.holders {
            let account = label(&holder.label);
            names.insert(account, holder.label.clone());
            for (symbol, amount) in &holder.balances {
                let info = lookup(&tokens, symbol)?;
                ledger
                    .tokens
                    .mint(&info.address, &account, parse_units(amount, info.decimals)?)?;
            }
        }

        if let Some(router) = &scenario.router {
            let handler = build_router(router, &tokens)?;
            let liquidity = parse_units(&router.liquidity, 0)?;
            for info in tokens.values() {
                let amount = liquidity
                    .checked_mul(pow10(info.decimals)?)
                    .context("router liquidity overflows")?;
                ledger.tokens.mint(&info.address, &handler.reserve(), amount)?;
            }
            ctx.solvers.register(Arc::new(handler));
        }

        let spec = &scenario.vault;
        let roles = Roles {
            admin: label(&spec.admin),
            asset_manager: label(&spec.asset_manager),
            treasury: label(&spec.treasury),
        };
        names.insert(roles.treasury, spec.treasury.clone());
        let config = PortfolioConfig {
            name: spec.name.clone(),
            symbol: spec.symbol.clone(),
            initial_portfolio_amount: parse_units(&spec.initial_portfolio_amount, SHARE_DECIMALS)?,
            min_portfolio_token_holding: parse_units(&spec.min_portfolio_token_holding, SHARE_DECIMALS)?,
            cooldown_period_secs: spec.cooldown_period_secs,
            fees: spec.fees.into(),
            roles,
            whitelist: WhitelistPolicy::default(),
        };
        let basket = spec
            .tokens
            .iter()
            .map(|symbol| lookup(&tokens, symbol).map(|info| info.address))
            .collect::<Result<Vec<_>>>()?;
        let vault = Portfolio::new(label(&spec.label), config, basket, &ledger, &ctx)?;

        info!(
            vault = %vault.address(),
            tokens = tokens.len(),
            holders = scenario.holders.len(),
            steps = scenario.steps.len(),
            "simulation ready"
        );
        Ok(Self {
            scenario,
            ledger,
            oracle,
            ctx,
            vault,
            tokens,
            names,
        })
    }

    /// Runs every step and summarizes the vault.
    pub fn run(mut self, fail_fast: bool) -> Result<SimulationReport> {
        let steps = std::mem::take(&mut self.scenario.steps);
        let mut outcomes = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            let at = self.ledger.now();
            let _step = step_span(&self.vault.config().symbol, index, step.action()).entered();
            debug!("running step");
            let result = match self.apply(step) {
                Ok(result) => result,
                Err(err) => match err.downcast_ref::<VaultError>() {
                    Some(vault_err) if !fail_fast => {
                        warn!(kind = %vault_err.kind(), error = %vault_err, "step rejected");
                        StepResult::Failed {
                            kind: vault_err.kind().to_string(),
                            error: vault_err.to_string(),
                        }
                    }
                    _ => return Err(err.context(format!("step {index} ({}) failed", step.action()))),
                },
            };
            outcomes.push(StepOutcome {
                index,
                action: step.action(),
                at,
                result,
            });
        }

        Ok(SimulationReport {
            vault: format!(
                "{} ({}) at {}",
                self.vault.config().name,
                self.vault.config().symbol,
                self.vault.address()
            ),
            steps: outcomes,
            summary: self.summary()?,
        })
    }

    fn apply(&mut self, step: &Step) -> Result<StepResult> {
        match step {
            Step::Deposit {
                holder,
                amounts,
                min_shares,
            } => {
                let request = DepositRequest {
                    amounts: self.amounts(amounts)?,
                    min_mint_amount: match min_shares {
                        Some(min) => parse_units(min, SHARE_DECIMALS)?,
                        None => U256::ZERO,
                    },
                };
                let receipt = self
                    .vault
                    .deposit(&mut self.ledger, &self.ctx, label(holder), &request)?;
                Ok(StepResult::Deposited {
                    holder: holder.clone(),
                    shares_minted: shares(receipt.shares_minted),
                    entry_fee_shares: shares(receipt.entry_fee.total()?),
                    value_usd: shares(receipt.value_usd),
                })
            }
            Step::Withdraw {
                holder,
                shares: amount,
                receiver,
            } => {
                let account = label(holder);
                let shares_in = if amount == "all" {
                    self.vault.balance_of(&account)
                } else {
                    parse_units(amount, SHARE_DECIMALS)?
                };
                let request = WithdrawRequest {
                    shares: shares_in,
                    receiver: label(receiver.as_deref().unwrap_or(holder)),
                    min_amounts_out: Vec::new(),
                    unwind: None,
                };
                let receipt = self.vault.withdraw(&mut self.ledger, &self.ctx, account, &request)?;
                let mut received = BTreeMap::new();
                for (symbol, info) in &self.tokens {
                    let amount = receipt.received(&info.address);
                    if !amount.is_zero() {
                        received.insert(symbol.clone(), format_units(amount, info.decimals));
                    }
                }
                Ok(StepResult::Withdrawn {
                    holder: holder.clone(),
                    shares_burned: shares(receipt.shares_burned),
                    exit_fee_shares: shares(receipt.exit_fee.total()?),
                    received,
                })
            }
            Step::Advance { days, seconds } => {
                self.ledger.advance(Duration::days(*days) + Duration::seconds(*seconds));
                Ok(StepResult::Advanced { to: self.ledger.now() })
            }
            Step::ChargeFees => {
                let charge = self.vault.charge_fees(&mut self.ledger, &self.ctx)?;
                Ok(StepResult::FeesCharged {
                    management_shares: split(&charge.management)?,
                    performance_shares: split(&charge.performance)?,
                })
            }
            Step::SetPrice { token, price } => {
                let price_usd = parse_units(price, SHARE_DECIMALS)?;
                self.set_price(token, price_usd)?;
                Ok(StepResult::PriceSet {
                    token: token.clone(),
                    price_usd: shares(price_usd),
                })
            }
            Step::Rebalance { tokens, swaps } => {
                let handler = match &self.scenario.router {
                    Some(router) => label(&router.label),
                    None => Address::ZERO,
                };
                let mut legs = Vec::with_capacity(swaps.len());
                for swap in swaps {
                    let sell = lookup(&self.tokens, &swap.sell)?;
                    let buy = lookup(&self.tokens, &swap.buy)?;
                    let sell_amount = parse_units(&swap.amount, sell.decimals)?;
                    legs.push(SwapLeg {
                        sell_token: sell.address,
                        sell_amount,
                        buy_token: buy.address,
                        min_output: parse_units(&swap.min_output, buy.decimals)?,
                        call_data: RouteInstruction::exact_in(sell.address, buy.address, sell_amount).encode()?,
                    });
                }
                let intent = RebalanceIntent {
                    new_tokens: tokens
                        .iter()
                        .map(|symbol| lookup(&self.tokens, symbol).map(|info| info.address))
                        .collect::<Result<_>>()?,
                    handler,
                    swaps: legs,
                };
                let manager = self.vault.config().roles.asset_manager;
                let report =
                    RebalancingEngine::new(&self.ctx).update_tokens(&mut self.vault, &mut self.ledger, manager, &intent)?;
                Ok(StepResult::Rebalanced {
                    tokens: tokens.clone(),
                    value_before_usd: shares(report.value_before_usd),
                    value_after_usd: shares(report.value_after_usd),
                    removed: report
                        .removals
                        .iter()
                        .map(|removal| self.ledger.tokens.symbol(&removal.token))
                        .collect(),
                })
            }
        }
    }

    /// Reprices `symbol` in the oracle and in the router's rates.
    fn set_price(&mut self, symbol: &str, price: U256) -> Result<()> {
        let info = self
            .tokens
            .get_mut(symbol)
            .with_context(|| format!("unknown token {symbol:?}"))?;
        info.price = price;
        let (address, decimals) = (info.address, info.decimals);
        self.oracle.set_price(address, decimals, price);
        self.ctx.oracle = Arc::new(self.oracle.clone());
        if let Some(router) = &self.scenario.router {
            self.ctx.solvers.register(Arc::new(build_router(router, &self.tokens)?));
        }
        Ok(())
    }

    fn amounts(&self, amounts: &BTreeMap<String, String>) -> Result<Vec<(Address, U256)>> {
        amounts
            .iter()
            .map(|(symbol, amount)| -> Result<(Address, U256)> {
                let info = lookup(&self.tokens, symbol)?;
                Ok((info.address, parse_units(amount, info.decimals)?))
            })
            .collect()
    }

    fn summary(&self) -> Result<VaultSummary> {
        let valuation = self.vault.valuation(&self.ledger, &self.ctx)?;
        let share_value = self.vault.share_value(&self.ledger, &self.ctx)?;
        let holdings = self
            .vault
            .tokens()
            .iter()
            .map(|token| -> Result<(String, String)> {
                let decimals = self.ledger.tokens.decimals(token)?;
                let balance = self.ledger.tokens.balance_of(token, &self.vault.address());
                Ok((self.ledger.tokens.symbol(token), format_units(balance, decimals)))
            })
            .collect::<Result<_>>()?;
        let holders = self
            .vault
            .shares()
            .holders()
            .filter(|(_, balance)| !balance.is_zero())
            .map(|(account, balance)| {
                let name = self
                    .names
                    .get(account)
                    .cloned()
                    .unwrap_or_else(|| account.to_string());
                (name, shares(*balance))
            })
            .collect();
        Ok(VaultSummary {
            total_supply: shares(self.vault.total_supply()),
            net_value_usd: shares(valuation.net_usd),
            share_value_usd: shares(share_value),
            high_water_mark_usd: shares(self.vault.fee_state().high_water_mark),
            holdings,
            holders,
        })
    }
}

/// A router quoting every ordered pair at oracle prices.
fn build_router(spec: &RouterSpec, tokens: &BTreeMap<String, TokenInfo>) -> Result<RouterHandler> {
    let mut router = RouterHandler::new(label(&spec.label), spec.fee_bps);
    for sell in tokens.values() {
        for buy in tokens.values() {
            if sell.address == buy.address {
                continue;
            }
            let numerator = sell
                .price
                .checked_mul(pow10(buy.decimals)?)
                .context("router rate overflows")?;
            let denominator = buy
                .price
                .checked_mul(pow10(sell.decimals)?)
                .context("router rate overflows")?;
            router.set_rate(sell.address, buy.address, numerator, denominator);
        }
    }
    Ok(router)
}

fn lookup<'a>(tokens: &'a BTreeMap<String, TokenInfo>, symbol: &str) -> Result<&'a TokenInfo> {
    tokens
        .get(symbol)
        .with_context(|| format!("unknown token {symbol:?}"))
}

fn shares(amount: U256) -> String {
    format_units(amount, SHARE_DECIMALS)
}

fn split(fee: &FeeSplit) -> Result<String> {
    Ok(shares(fee.total()?))
}
