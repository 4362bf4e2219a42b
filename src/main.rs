//! Paper-trading engine simulation.
//!
//! Seeds a few accounts against an in-memory store, trades them into long and
//! short positions, lets the valuation loop revalue them against a random-walk
//! quote feed, then forces a stop-out pass and prints the leaderboard.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use papertrade_core::schedule::local_date;
use papertrade_core::telemetry::init_logging;
use papertrade_core::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "papertrade-sim", about = "Run the paper-trading engine against simulated quotes")]
struct Args {
    /// Config file; defaults to $PAPERTRADE_CONFIG or config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to let the background loops run
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Override the valuation interval, in seconds
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Random-walk seed
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// Quote feed where each fetch moves the price by up to `step_bps` either way.
struct RandomWalkQuotes {
    state: Mutex<(StdRng, HashMap<String, Decimal>)>,
    step_bps: i64,
}

impl RandomWalkQuotes {
    fn new(seed: u64, start: &[(&str, Decimal)], step_bps: i64) -> Self {
        let prices = start.iter().map(|(t, p)| (t.to_string(), *p)).collect();
        Self {
            state: Mutex::new((StdRng::seed_from_u64(seed), prices)),
            step_bps,
        }
    }
}

#[async_trait]
impl QuoteProvider for RandomWalkQuotes {
    async fn get_last_price(&self, ticker: &str) -> Result<PriceQuote, QuoteError> {
        let mut guard = self.state.lock();
        let (rng, prices) = &mut *guard;
        let bps = rng.gen_range(-self.step_bps..=self.step_bps);
        let current = prices
            .get_mut(ticker)
            .ok_or_else(|| QuoteError::UnknownTicker(ticker.to_string()))?;

        let open = *current;
        let next = (*current * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2).max(dec!(0.01));
        *current = next;

        let last = Price::new(next).ok_or_else(|| QuoteError::Unavailable(ticker.to_string(), "non-positive".to_string()))?;
        let spread = (next * dec!(0.0005)).round_dp(2);
        Ok(PriceQuote {
            ticker: ticker.to_string(),
            last,
            bid: Price::new(next - spread),
            ask: Price::new(next + spread),
            change: next - open,
            fetched_at: Timestamp::now(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    if let Some(secs) = args.tick_secs {
        config.valuation.interval_secs = secs;
        config.validate().context("--tick-secs")?;
    }
    init_logging(config.logging.format)?;

    info!(seconds = args.seconds, "Paper-trading simulation starting");

    let store = Arc::new(MemoryStore::new(&config.store));
    let sber = store.add_instrument("SBER", "Sberbank");
    let gazp = store.add_instrument("GAZP", "Gazprom");
    let lkoh = store.add_instrument("LKOH", "Lukoil");
    store.add_promocode("WELCOME", 100, Amount::new(dec!(1000)));

    let quotes = Arc::new(RandomWalkQuotes::new(
        args.seed,
        &[("SBER", dec!(250)), ("GAZP", dec!(160)), ("LKOH", dec!(7000))],
        300,
    ));
    let prices = Arc::new(PriceCache::new(quotes, config.valuation.quote_timeout()));
    let cache = Arc::new(AccountCache::new());
    let board = Arc::new(RankingBoard::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger = Arc::new(Ledger::new(
        Stores::shared(store.clone()),
        prices.clone(),
        cache.clone(),
        config.trading.clone(),
    ));

    let alice = ledger.open_account("alice").await?;
    let bob = ledger.open_account("bob").await?;
    let carol = ledger.open_account("carol").await?;

    ledger.apply_promocode(alice.id, "WELCOME").await?;
    let today = local_date(clock.now(), config.stop_out.time_zone);
    ledger.claim_daily_reward(carol.id, today).await?;

    // trade at the first live quote
    let sber_px = prices.fetch(&sber.ticker).await?.buy_price();
    let gazp_px = prices.fetch(&gazp.ticker).await?.sell_price();
    let lkoh_px = prices.fetch(&lkoh.ticker).await?.buy_price();

    let alice_max = ledger.max_count_to_buy(alice.id, sber.id, sber_px).await?;
    ledger.buy_instrument(alice.id, sber.id, alice_max / 2, sber_px).await?;

    let bob_max = ledger.max_count_to_sell(bob.id, gazp.id, gazp_px).await?;
    ledger.sell_instrument(bob.id, gazp.id, bob_max, gazp_px).await?;

    ledger.buy_instrument(carol.id, lkoh.id, 1, lkoh_px).await?;
    match ledger.buy_instrument(carol.id, lkoh.id, 1_000, lkoh_px).await {
        Err(e) if e.is_rejection() => info!(error = %e, "Oversized order rejected as expected"),
        other => warn!(result = ?other.map(|r| r.units), "Oversized order was not rejected"),
    }

    let cancel = CancellationToken::new();
    let valuation = ValuationLoop::new(
        store.clone(),
        prices.clone(),
        board.clone(),
        cache.clone(),
        notifier.clone(),
        config.trading.clone(),
        &config.valuation,
    );
    let stop_out = StopOutProcessor::new(
        ledger.clone(),
        store.clone(),
        board.clone(),
        notifier.clone(),
        clock.clone(),
        config.stop_out.clone(),
    );

    let valuation_task = tokio::spawn(valuation.run(cancel.clone()));
    let stop_out_task = tokio::spawn(stop_out.run(cancel.clone()));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    cancel.cancel();
    valuation_task.await?;
    stop_out_task.await?;

    // one forced pass so the demo always shows the stop-out path
    let manual = StopOutProcessor::new(
        ledger.clone(),
        store.clone(),
        board.clone(),
        notifier,
        clock,
        config.stop_out.clone(),
    );
    let report = manual.run_once().await;
    println!(
        "\nStop-out: {} candidates, {} buy-backs, {} restored, {} failed",
        report.candidates, report.liquidations, report.restored, report.failed
    );

    let snapshot = board.load();
    println!("\nLeaderboard ({} accounts)", snapshot.len());
    for (rank, entry) in snapshot.page(0, ACCOUNTS_PER_PAGE).iter().enumerate() {
        println!(
            "  {:>2}. {:<8} total {:>12}  available {:>12}  blocked {:>10}  {}",
            rank + 1,
            entry.name,
            entry.total,
            entry.available,
            entry.blocked,
            if entry.margin.is_called() { "MARGIN CALL" } else { "" }
        );
    }

    for account in [alice.id, bob.id, carol.id] {
        let history = ledger.operations().history_page(account, 0, OPERATIONS_PER_PAGE).await?;
        println!("\nAccount {} last operations:", account);
        for op in history {
            println!("  #{:<4} {:<12} x{:<6} {}", op.id.0, op.kind, op.count, op.total_amount);
        }
    }

    info!("Simulation finished");
    Ok(())
}
