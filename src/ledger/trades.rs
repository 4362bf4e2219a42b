//! Buy and sell execution.
//!
//! A trade first closes units against the opposite lot, then opens the rest
//! on its own side. Cash effects per leg, with fee rate f, coverage rate c,
//! trade price p and entry price a:
//!
//! - close long:  available += n*p - n*p*f
//! - close short: release min(blocked, n*p*c); available += (a - p)*n - n*p*f
//! - open long:   available -= n*p*(1 + f), needs that much available
//! - open short:  available -= n*p*(c + f), blocked += n*p*c, needs n*p*(c + f)
//!
//! The whole trade is one store transaction on the locked position row.

use super::core::Ledger;
use super::results::{LedgerError, TradeReceipt};
use crate::config::TradingParams;
use crate::operation::{NewOperation, OperationKind};
use crate::position::{PositionError, PositionState};
use crate::store::{BalanceChange, CommitOutcome, StoreError};
use crate::types::{AccountId, Amount, InstrumentId, Price, Side};
use rust_decimal::Decimal;

/// Balance changes and resulting position for one trade, before commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePlan {
    pub side: Side,
    pub units: u64,
    pub price: Price,
    pub closed: u64,
    pub opened: u64,
    pub changes: Vec<BalanceChange>,
    pub next: PositionState,
    pub fee: Amount,
    pub realized_pnl: Amount,
    /// Cash the opening leg needs; zero for a pure close.
    pub required: Amount,
}

pub fn plan_trade(
    current: PositionState,
    side: Side,
    units: u64,
    price: Price,
    params: &TradingParams,
) -> Result<TradePlan, PositionError> {
    if units == 0 {
        return Err(PositionError::ZeroUnits);
    }

    let fee_rate = params.fee_rate();
    let coverage_rate = params.coverage_rate();
    let mut changes = Vec::with_capacity(3);
    let mut realized_pnl = Amount::zero();

    let closing = current.close_against(side, units);
    if let Some(entry) = closing.entry_price {
        let n = Decimal::from(closing.closed);
        let notional = price.notional(closing.closed);
        let fee = notional.mul(fee_rate);

        match side {
            // buying back a short
            Side::Long => {
                realized_pnl = Amount::new((entry.value() - price.value()) * n);
                changes.push(BalanceChange::Release {
                    up_to: notional.mul(coverage_rate),
                });
                changes.push(BalanceChange::Adjust(realized_pnl.sub(fee)));
            }
            // selling out of a long
            Side::Short => {
                realized_pnl = Amount::new((price.value() - entry.value()) * n);
                changes.push(BalanceChange::Adjust(notional.sub(fee)));
            }
        }
    }

    let opened = units - closing.closed;
    let mut required = Amount::zero();
    let next = if opened > 0 {
        let notional = price.notional(opened);
        let (spend, block) = match side {
            Side::Long => (notional.mul(Decimal::ONE + fee_rate), Amount::zero()),
            Side::Short => (notional.mul(fee_rate), notional.mul(coverage_rate)),
        };
        required = spend.add(block);
        changes.push(BalanceChange::Reserve { spend, block });
        closing.remaining.open(side, opened, price)?
    } else {
        closing.remaining
    };

    Ok(TradePlan {
        side,
        units,
        price,
        closed: closing.closed,
        opened,
        changes,
        next,
        fee: price.notional(units).mul(fee_rate),
        realized_pnl,
        required,
    })
}

impl Ledger {
    pub async fn buy_instrument(
        &self,
        account_id: AccountId,
        instrument_id: InstrumentId,
        count: u64,
        price: Price,
    ) -> Result<TradeReceipt, LedgerError> {
        self.execute(account_id, instrument_id, Side::Long, count, price).await
    }

    pub async fn sell_instrument(
        &self,
        account_id: AccountId,
        instrument_id: InstrumentId,
        count: u64,
        price: Price,
    ) -> Result<TradeReceipt, LedgerError> {
        self.execute(account_id, instrument_id, Side::Short, count, price).await
    }

    async fn execute(
        &self,
        account_id: AccountId,
        instrument_id: InstrumentId,
        side: Side,
        units: u64,
        price: Price,
    ) -> Result<TradeReceipt, LedgerError> {
        if units == 0 {
            return Err(LedgerError::InvalidCount);
        }

        let mut tx = self.positions.lock_position(account_id, instrument_id).await?;
        let current = tx.position().map(|p| p.state()).unwrap_or_default();
        let plan = plan_trade(current, side, units, price, &self.params)?;

        for change in &plan.changes {
            tx.adjust_balances(*change);
        }
        match plan.next.lot() {
            Some(lot) => tx.upsert_position(plan.next.signed_count(), lot.avg_price),
            None if tx.position().is_some() => tx.delete_position(),
            None => {}
        }

        let kind = match side {
            Side::Long => OperationKind::Buy,
            Side::Short => OperationKind::Sell,
        };
        let trade = tx.append_operation(NewOperation::trade(account_id, kind, instrument_id, units, price), None);
        tx.append_operation(
            NewOperation::fee(account_id, instrument_id, units, price, plan.fee),
            Some(trade),
        );

        match tx.commit().await? {
            CommitOutcome::Committed { account, operation_ids } => {
                self.cache.put(account.clone());
                tracing::info!(
                    account_id = %account_id,
                    instrument_id = %instrument_id,
                    side = %side,
                    units,
                    price = %price,
                    closed = plan.closed,
                    opened = plan.opened,
                    fee = %plan.fee,
                    available = %account.available,
                    "Trade committed"
                );

                let (operation_id, fee_operation_id) = match operation_ids.as_slice() {
                    [trade_id, fee_id, ..] => (*trade_id, *fee_id),
                    _ => {
                        return Err(LedgerError::Store(StoreError::Unavailable(
                            "commit returned no operation ids".to_string(),
                        )))
                    }
                };

                Ok(TradeReceipt {
                    account,
                    side,
                    units,
                    price,
                    closed: plan.closed,
                    opened: plan.opened,
                    position: plan.next,
                    fee: plan.fee,
                    realized_pnl: plan.realized_pnl,
                    operation_id,
                    fee_operation_id,
                })
            }
            CommitOutcome::Shortfall { required, available } => {
                tracing::debug!(
                    account_id = %account_id,
                    instrument_id = %instrument_id,
                    side = %side,
                    units,
                    required = %required,
                    available = %available,
                    "Trade rejected, insufficient funds"
                );
                Err(LedgerError::InsufficientFunds { required, available })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Lot;
    use rust_decimal_macros::dec;

    fn px(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn amt(v: Decimal) -> Amount {
        Amount::new(v)
    }

    #[test]
    fn opening_short_reserves_coverage_and_fee() {
        let plan = plan_trade(PositionState::Flat, Side::Short, 10, px(dec!(50)), &TradingParams::default()).unwrap();

        assert_eq!(plan.required, amt(dec!(251.5)));
        assert_eq!(
            plan.changes,
            vec![BalanceChange::Reserve {
                spend: amt(dec!(1.5)),
                block: amt(dec!(250))
            }]
        );
        assert_eq!(plan.next, PositionState::Short(Lot::new(10, px(dec!(50)))));
        assert_eq!(plan.fee, amt(dec!(1.5)));
    }

    #[test]
    fn opening_long_costs_price_plus_fee() {
        let plan = plan_trade(PositionState::Flat, Side::Long, 10, px(dec!(100)), &TradingParams::default()).unwrap();
        assert_eq!(plan.required, amt(dec!(1003)));
        assert_eq!(plan.opened, 10);
        assert_eq!(plan.closed, 0);
    }

    #[test]
    fn closing_long_credits_notional_less_fee() {
        let long = PositionState::Long(Lot::new(4, px(dec!(100))));
        let plan = plan_trade(long, Side::Short, 4, px(dec!(110)), &TradingParams::default()).unwrap();

        assert_eq!(plan.changes, vec![BalanceChange::Adjust(amt(dec!(438.68)))]);
        assert_eq!(plan.realized_pnl, amt(dec!(40)));
        assert_eq!(plan.next, PositionState::Flat);
        assert!(plan.required.is_zero());
    }

    #[test]
    fn closing_short_releases_coverage_and_settles_pnl() {
        let short = PositionState::Short(Lot::new(10, px(dec!(50))));
        let plan = plan_trade(short, Side::Long, 4, px(dec!(40)), &TradingParams::default()).unwrap();

        assert_eq!(
            plan.changes,
            vec![
                BalanceChange::Release { up_to: amt(dec!(80)) },
                BalanceChange::Adjust(amt(dec!(39.52))),
            ]
        );
        assert_eq!(plan.next, PositionState::Short(Lot::new(6, px(dec!(50)))));
        assert_eq!(plan.opened, 0);
    }

    #[test]
    fn crossing_closes_then_opens() {
        let short = PositionState::Short(Lot::new(3, px(dec!(10))));
        let plan = plan_trade(short, Side::Long, 5, px(dec!(10)), &TradingParams::default()).unwrap();

        assert_eq!(plan.closed, 3);
        assert_eq!(plan.opened, 2);
        assert_eq!(plan.next, PositionState::Long(Lot::new(2, px(dec!(10)))));
        assert_eq!(plan.required, amt(dec!(20.06)));
        assert_eq!(plan.fee, amt(dec!(0.15)));
    }

    #[test]
    fn zero_units_is_rejected() {
        let err = plan_trade(PositionState::Flat, Side::Long, 0, px(dec!(1)), &TradingParams::default()).unwrap_err();
        assert_eq!(err, PositionError::ZeroUnits);
    }
}
