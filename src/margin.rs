//! Margin state and position revaluation.
//!
//! Margin is a two-state machine, not a level flag. An account becomes
//! `MarginCalled` only when a solvent account's available cash drops below
//! zero, and returns to `Solvent` only when a margin-called account's
//! available cash is back at or above zero. Staying below zero across
//! revaluations is not a transition, so the holder is told once.
//!
//! Revaluation re-prices every open short's coverage at the latest price and
//! moves the difference between blocked and available cash. The margin state
//! is then observed against the row as written, never against the read that
//! produced the delta.

use crate::account::Account;
use crate::config::TradingParams;
use crate::position::{PositionState, PositionSummary};
use crate::types::{Amount, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarginState {
    #[default]
    Solvent,
    MarginCalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginTransition {
    Raised,
    Cleared,
    Unchanged,
}

impl MarginState {
    pub fn is_called(&self) -> bool {
        matches!(self, MarginState::MarginCalled)
    }

    /// Apply one observation of available cash.
    pub fn observe(self, available: Amount) -> (MarginState, MarginTransition) {
        match self {
            MarginState::Solvent if available.is_negative() => {
                (MarginState::MarginCalled, MarginTransition::Raised)
            }
            MarginState::MarginCalled if !available.is_negative() => {
                (MarginState::Solvent, MarginTransition::Cleared)
            }
            state => (state, MarginTransition::Unchanged),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No price this tick for {0}")]
pub struct MissingQuote(pub String);

/// Outcome of revaluing one account's positions at the latest prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revaluation {
    /// Moved from blocked to available (negative moves cash into blocked).
    pub blocked_delta: Amount,
    pub required_coverage: Amount,
    /// Last price times count, summed over longs.
    pub gross_long_value: Amount,
}

/// Coverage required for a short of `units` at `price`.
pub fn required_coverage(units: u64, price: Price, coverage_rate: Decimal) -> Amount {
    price.notional(units).mul(coverage_rate)
}

pub fn revalue(
    account: &Account,
    positions: &[PositionSummary],
    prices: &HashMap<String, Price>,
    params: &TradingParams,
) -> Result<Revaluation, MissingQuote> {
    let coverage_rate = params.coverage_rate();

    let mut gross_long_value = Amount::zero();
    let mut required = Amount::zero();

    for position in positions {
        let last = *prices
            .get(&position.ticker)
            .ok_or_else(|| MissingQuote(position.ticker.clone()))?;

        match position.state() {
            PositionState::Flat => {}
            PositionState::Long(lot) => {
                gross_long_value = gross_long_value.add(last.notional(lot.units));
            }
            PositionState::Short(lot) => {
                required = required.add(required_coverage(lot.units, last, coverage_rate));
            }
        }
    }

    Ok(Revaluation {
        blocked_delta: account.blocked.sub(required),
        required_coverage: required,
        gross_long_value,
    })
}

/// Leaderboard total: cash plus the market value of longs.
pub fn total_balance(account: &Account, gross_long_value: Amount) -> Amount {
    account.available.add(account.blocked).add(gross_long_value)
}
