//! Largest affordable trade sizes.
//!
//! Units that close the opposite lot are always allowed. Past that, the cash
//! left after closing the whole lot is divided by the per-unit opening cost
//! (p*(1 + f) for a buy, p*(c + f) for a sell) and floored. The cost formulas
//! are the same ones `plan_trade` uses, so the result always commits.

use super::core::Ledger;
use super::results::LedgerError;
use crate::config::TradingParams;
use crate::position::PositionState;
use crate::types::{AccountId, Amount, InstrumentId, Price, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub fn max_count_to_buy(available: Amount, blocked: Amount, current: PositionState, price: Price, params: &TradingParams) -> u64 {
    let fee_rate = params.fee_rate();
    let (closable, after_close) = match current {
        PositionState::Short(lot) => {
            let notional = price.notional(lot.units);
            let released = notional.mul(params.coverage_rate()).min(blocked);
            let pnl = Amount::new((lot.avg_price.value() - price.value()) * Decimal::from(lot.units));
            (lot.units, available.add(released).add(pnl).sub(notional.mul(fee_rate)))
        }
        _ => (0, available),
    };
    closable + affordable_units(after_close, price.value() * (Decimal::ONE + fee_rate))
}

pub fn max_count_to_sell(available: Amount, current: PositionState, price: Price, params: &TradingParams) -> u64 {
    let fee_rate = params.fee_rate();
    let (closable, after_close) = match current {
        PositionState::Long(lot) => {
            let notional = price.notional(lot.units);
            (lot.units, available.add(notional).sub(notional.mul(fee_rate)))
        }
        _ => (0, available),
    };
    closable + affordable_units(after_close, price.value() * (params.coverage_rate() + fee_rate))
}

fn affordable_units(cash: Amount, unit_cost: Decimal) -> u64 {
    if cash.is_negative() || unit_cost <= Decimal::ZERO {
        return 0;
    }
    let mut units = (cash.value() / unit_cost).floor().to_u64().unwrap_or(0);
    // division rounds at the last digit; never report a size that would fail
    while units > 0 && unit_cost * Decimal::from(units) > cash.value() {
        units -= 1;
    }
    units
}

impl Ledger {
    pub async fn max_count_to_buy(&self, account_id: AccountId, instrument_id: InstrumentId, price: Price) -> Result<u64, LedgerError> {
        let (available, blocked, current) = self.trade_inputs(account_id, instrument_id).await?;
        Ok(max_count_to_buy(available, blocked, current, price, &self.params))
    }

    pub async fn max_count_to_sell(&self, account_id: AccountId, instrument_id: InstrumentId, price: Price) -> Result<u64, LedgerError> {
        let (available, _, current) = self.trade_inputs(account_id, instrument_id).await?;
        Ok(max_count_to_sell(available, current, price, &self.params))
    }

    /// Largest count for a trade on `side`.
    pub async fn max_count(&self, account_id: AccountId, instrument_id: InstrumentId, side: Side, price: Price) -> Result<u64, LedgerError> {
        match side {
            Side::Long => self.max_count_to_buy(account_id, instrument_id, price).await,
            Side::Short => self.max_count_to_sell(account_id, instrument_id, price).await,
        }
    }

    async fn trade_inputs(&self, account_id: AccountId, instrument_id: InstrumentId) -> Result<(Amount, Amount, PositionState), LedgerError> {
        let account = self.fresh_account(account_id).await?;
        let current = self
            .positions
            .get_position(account_id, instrument_id)
            .await?
            .map(|p| p.state())
            .unwrap_or_default();
        Ok((account.available, account.blocked, current))
    }
}
