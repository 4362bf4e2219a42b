//! Solvency invariant tests.
//!
//! Random trade sequences run through the full ledger and in-memory store.
//! Whatever mix of fills and rejections happens, cash plus long cost basis
//! must equal the starting balance less fees plus realized P&L, blocked
//! cash never goes negative, and every fill leaves a trade and a fee record.

use papertrade_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Order {
    buy: bool,
    instrument: usize,
    units: u64,
    price: Decimal,
}

fn order_strategy() -> impl Strategy<Value = Order> {
    (any::<bool>(), 0usize..3, 1u64..20, 450i64..=600i64).prop_map(|(buy, instrument, units, tenths)| Order {
        buy,
        instrument,
        units,
        price: Decimal::new(tenths, 1),
    })
}

struct Outcome {
    available: Decimal,
    blocked: Decimal,
    long_cost: Decimal,
    expected_cash: Decimal,
    fills: usize,
    operations: usize,
    net_counts: [i64; 3],
    stored_counts: [i64; 3],
}

fn run_orders(start: Decimal, orders: Vec<Order>) -> Outcome {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async move {
        let store = Arc::new(MemoryStore::default());
        let instruments: Vec<InstrumentId> = ["SBER", "GAZP", "LKOH"]
            .iter()
            .map(|t| store.add_instrument(t, t).id)
            .collect();
        let prices = Arc::new(PriceCache::new(Arc::new(StaticQuotes::new()), Duration::from_secs(1)));
        let ledger = Ledger::new(
            Stores::shared(store.clone()),
            prices,
            Arc::new(AccountCache::new()),
            TradingParams::default(),
        );
        let ann = store.create_account(NewAccount::new("ann", Amount::new(start))).await.unwrap().id;

        let mut expected_cash = start;
        let mut fills = 0;
        let mut net_counts = [0i64; 3];

        for order in orders {
            let instrument = instruments[order.instrument];
            let price = Price::new_unchecked(order.price);
            let result = if order.buy {
                ledger.buy_instrument(ann, instrument, order.units, price).await
            } else {
                ledger.sell_instrument(ann, instrument, order.units, price).await
            };
            match result {
                Ok(receipt) => {
                    fills += 1;
                    expected_cash = expected_cash - receipt.fee.value() + receipt.realized_pnl.value();
                    let signed = order.units as i64;
                    net_counts[order.instrument] += if order.buy { signed } else { -signed };
                }
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected ledger error: {e}"),
            }
        }

        let account = store.get_account(ann).await.unwrap();
        let positions = store.positions(ann).await.unwrap();
        let long_cost = positions
            .iter()
            .filter(|p| p.count > 0)
            .map(|p| p.cost_basis().value())
            .sum();
        let mut stored_counts = [0i64; 3];
        for position in &positions {
            if let Some(i) = instruments.iter().position(|id| *id == position.instrument_id) {
                stored_counts[i] = position.count;
            }
        }

        Outcome {
            available: account.available.value(),
            blocked: account.blocked.value(),
            long_cost,
            expected_cash,
            fills,
            operations: store.operations_of(ann).len(),
            net_counts,
            stored_counts,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cash is only ever lost to fees and realized losses
    #[test]
    fn cash_is_conserved(
        start in (1_000i64..5_000i64).prop_map(Decimal::from),
        orders in proptest::collection::vec(order_strategy(), 1..40),
    ) {
        let outcome = run_orders(start, orders);
        let held = outcome.available + outcome.blocked + outcome.long_cost;
        let drift = (held - outcome.expected_cash).abs();
        prop_assert!(drift < dec!(0.000001), "held {} expected {}", held, outcome.expected_cash);
    }

    /// Blocked cash never goes negative and no fill is left without its records
    #[test]
    fn fills_are_fully_recorded(
        orders in proptest::collection::vec(order_strategy(), 1..40),
    ) {
        let outcome = run_orders(dec!(2000), orders);
        prop_assert!(outcome.blocked >= Decimal::ZERO);
        prop_assert_eq!(outcome.operations, outcome.fills * 2);
        prop_assert_eq!(outcome.stored_counts, outcome.net_counts);
    }
}

#[test]
fn rejected_orders_leave_no_trace() {
    let outcome = run_orders(
        dec!(100),
        vec![
            Order {
                buy: true,
                instrument: 0,
                units: 10,
                price: dec!(50),
            },
            Order {
                buy: false,
                instrument: 1,
                units: 10,
                price: dec!(50),
            },
        ],
    );
    assert_eq!(outcome.fills, 0);
    assert_eq!(outcome.operations, 0);
    assert_eq!(outcome.available, dec!(100));
    assert_eq!(outcome.blocked, Decimal::ZERO);
}
