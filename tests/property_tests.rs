//! Property-based tests for the trade and margin math.
//!
//! These tests verify invariants hold under random inputs.

use papertrade_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 10,000
}

fn units_strategy() -> impl Strategy<Value = u64> {
    1u64..5_000u64
}

fn cash_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 0 to 1,000,000
}

/// Apply planned balance changes the way a store commit does.
fn apply(changes: &[BalanceChange], available: Decimal, blocked: Decimal) -> (Decimal, Decimal) {
    let (mut available, mut blocked) = (available, blocked);
    for change in changes {
        match *change {
            BalanceChange::Adjust(amount) => available += amount.value(),
            BalanceChange::Reserve { spend, block } => {
                available -= spend.value() + block.value();
                blocked += block.value();
            }
            BalanceChange::Release { up_to } => {
                let released = up_to.value().max(Decimal::ZERO).min(blocked);
                blocked -= released;
                available += released;
            }
        }
    }
    (available, blocked)
}

proptest! {
    /// Opening then closing at the same price costs exactly the two fees
    #[test]
    fn round_trip_costs_two_fees(
        units in units_strategy(),
        price in price_strategy(),
        long in any::<bool>(),
    ) {
        let params = TradingParams::default();
        let price = Price::new_unchecked(price);
        let (open_side, close_side) = if long { (Side::Long, Side::Short) } else { (Side::Short, Side::Long) };

        let open = plan_trade(PositionState::Flat, open_side, units, price, &params).unwrap();
        let close = plan_trade(open.next, close_side, units, price, &params).unwrap();
        prop_assert_eq!(close.next, PositionState::Flat);

        let start = price.notional(units).value() * dec!(2);
        let (available, blocked) = apply(&open.changes, start, Decimal::ZERO);
        let (available, blocked) = apply(&close.changes, available, blocked);

        let two_fees = price.notional(units).mul(params.fee_rate()).value() * dec!(2);
        prop_assert_eq!(blocked, Decimal::ZERO);
        prop_assert_eq!(start - available, two_fees);
    }

    /// Adding to a lot keeps the volume-weighted entry price
    #[test]
    fn averaging_is_volume_weighted(
        first in units_strategy(),
        second in units_strategy(),
        p1 in price_strategy(),
        p2 in price_strategy(),
        long in any::<bool>(),
    ) {
        let params = TradingParams::default();
        let side = if long { Side::Long } else { Side::Short };
        let (p1, p2) = (Price::new_unchecked(p1), Price::new_unchecked(p2));

        let a = plan_trade(PositionState::Flat, side, first, p1, &params).unwrap();
        let b = plan_trade(a.next, side, second, p2, &params).unwrap();
        let lot = b.next.lot().unwrap();

        prop_assert_eq!(lot.units, first + second);
        prop_assert_eq!(b.next.side(), Some(side));
        prop_assert!(lot.avg_price >= p1.min(p2) && lot.avg_price <= p1.max(p2));

        let total_cost = p1.notional(first).add(p2.notional(second)).value();
        let drift = (lot.cost_basis().value() - total_cost).abs();
        prop_assert!(drift < dec!(0.000001), "cost basis drifted by {}", drift);
    }

    /// A trade against an open lot closes first, then opens the rest
    #[test]
    fn crossing_splits_close_and_open(
        held in units_strategy(),
        traded in units_strategy(),
        price in price_strategy(),
    ) {
        let params = TradingParams::default();
        let price = Price::new_unchecked(price);
        let short = PositionState::Short(Lot::new(held, price));

        let plan = plan_trade(short, Side::Long, traded, price, &params).unwrap();
        prop_assert_eq!(plan.closed + plan.opened, traded);
        prop_assert_eq!(plan.closed, held.min(traded));
        match traded.cmp(&held) {
            std::cmp::Ordering::Less => prop_assert_eq!(plan.next.side(), Some(Side::Short)),
            std::cmp::Ordering::Equal => prop_assert_eq!(plan.next, PositionState::Flat),
            std::cmp::Ordering::Greater => prop_assert_eq!(plan.next.side(), Some(Side::Long)),
        }
        prop_assert_eq!(plan.required.is_zero(), plan.opened == 0);
    }

    /// Max buy is affordable and one more is not
    #[test]
    fn max_buy_is_tight(
        cash in cash_strategy(),
        price in price_strategy(),
    ) {
        let params = TradingParams::default();
        let price = Price::new_unchecked(price);
        let n = max_count_to_buy(Amount::new(cash), Amount::zero(), PositionState::Flat, price, &params);

        let unit_cost = price.value() * (Decimal::ONE + params.fee_rate());
        prop_assert!(unit_cost * Decimal::from(n) <= cash);
        prop_assert!(unit_cost * Decimal::from(n + 1) > cash);

        if n > 0 {
            let plan = plan_trade(PositionState::Flat, Side::Long, n, price, &params).unwrap();
            prop_assert!(plan.required.value() <= cash);
        }
    }

    /// Max sell is affordable and one more is not
    #[test]
    fn max_sell_is_tight(
        cash in cash_strategy(),
        price in price_strategy(),
    ) {
        let params = TradingParams::default();
        let price = Price::new_unchecked(price);
        let n = max_count_to_sell(Amount::new(cash), PositionState::Flat, price, &params);

        let unit_cost = price.value() * (params.coverage_rate() + params.fee_rate());
        prop_assert!(unit_cost * Decimal::from(n) <= cash);
        prop_assert!(unit_cost * Decimal::from(n + 1) > cash);
    }

    /// Stop-out picks the smallest buy-back that restores available
    #[test]
    fn buyback_is_minimal(
        units in 1u64..200u64,
        entry in 100i64..10_000i64,
        move_bps in -5_000i64..15_000i64,
        deficit in 1i64..500_000i64,
    ) {
        let params = TradingParams::default();
        let entry = Price::new_unchecked(Decimal::new(entry, 2));
        let Some(price) = Price::new((entry.value() * (Decimal::ONE + Decimal::new(move_bps, 4))).round_dp(2)) else {
            return Ok(());
        };
        let lot = Lot::new(units, entry);
        let available = Decimal::new(-deficit, 2);
        let blocked = price.notional(units).mul(params.coverage_rate()).value();

        let plan = plan_buyback(Amount::new(available), Amount::new(blocked), &lot, price, &params);
        prop_assert!(plan.units >= 1 && plan.units <= units);

        let after = |n: u64| {
            let trade = plan_trade(PositionState::Short(lot), Side::Long, n, price, &params).unwrap();
            apply(&trade.changes, available, blocked).0
        };
        if plan.restores_solvency {
            prop_assert!(after(plan.units) >= Decimal::ZERO);
            if plan.units > 1 {
                prop_assert!(after(plan.units - 1) < Decimal::ZERO);
            }
        } else {
            prop_assert_eq!(plan.units, units);
            prop_assert!((1..=units).all(|n| after(n) < Decimal::ZERO));
        }
    }

    /// Margin calls are raised once per dip below zero and cleared once per recovery
    #[test]
    fn margin_hysteresis(
        path in proptest::collection::vec(-1_000i64..1_000i64, 1..60),
    ) {
        let mut state = MarginState::Solvent;
        let mut raised = 0;
        let mut cleared = 0;
        let mut dips = 0;
        let mut below = false;

        for cents in path {
            let available = Amount::new(Decimal::new(cents, 2));
            if available.is_negative() && !below {
                dips += 1;
            }
            below = available.is_negative();

            let (next, transition) = state.observe(available);
            match transition {
                MarginTransition::Raised => raised += 1,
                MarginTransition::Cleared => cleared += 1,
                MarginTransition::Unchanged => prop_assert_eq!(next, state),
            }
            prop_assert_eq!(next.is_called(), below);
            state = next;
        }

        prop_assert_eq!(raised, dips);
        prop_assert!(cleared == raised || cleared + 1 == raised);
    }
}

#[test]
fn extreme_price_does_not_overflow() {
    let params = TradingParams::default();
    let price = Price::new_unchecked(dec!(1000000000));
    let plan = plan_trade(PositionState::Flat, Side::Short, 1_000_000, price, &params).unwrap();
    assert_eq!(plan.required, Amount::new(dec!(503000000000000)));
}

#[test]
fn sub_cent_price_still_charges_fee() {
    let params = TradingParams::default();
    let plan = plan_trade(PositionState::Flat, Side::Long, 3, Price::new_unchecked(dec!(0.01)), &params).unwrap();
    assert_eq!(plan.fee, Amount::new(dec!(0.00009)));
    assert_eq!(plan.required, Amount::new(dec!(0.03009)));
}
