//! Daily stop-out.
//!
//! Once a day, every account the latest leaderboard shows as margin-called
//! buys back its most expensive short (by avg_price * |count|) through the
//! ledger, using the smallest unit count that brings available cash back to
//! zero or above. If closing the whole short is not enough, the next most
//! expensive short is taken, up to a per-account limit.

use crate::config::{StopOutConfig, TradingParams};
use crate::events::{notify_logged, AccountEvent, Notifier, StopOutEvent};
use crate::ledger::{Ledger, LedgerError};
use crate::position::Lot;
use crate::price_cache::QuoteError;
use crate::ranking::RankingBoard;
use crate::schedule::{next_daily_run, until, Clock};
use crate::store::{PositionStore, StoreError};
use crate::types::{AccountId, Amount, Price};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StopOutError {
    #[error("Ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),

    #[error("Quote: {0}")]
    Quote(#[from] QuoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buyback {
    pub units: u64,
    /// False when even closing the whole lot leaves available below zero.
    pub restores_solvency: bool,
}

/// Cash effect on available of buying back `n` units of a short.
fn short_close_effect(n: u64, blocked: Amount, short: &Lot, price: Price, params: &TradingParams) -> Amount {
    let notional = price.notional(n);
    let released = notional.mul(params.coverage_rate()).min(blocked);
    let pnl = Amount::new((short.avg_price.value() - price.value()) * Decimal::from(n));
    released.add(pnl).sub(notional.mul(params.fee_rate()))
}

/// Largest n whose coverage release n * p * c still fits in blocked.
fn full_release_units(blocked: Amount, short: &Lot, price: Price, params: &TradingParams) -> u64 {
    let per_unit = price.value() * params.coverage_rate();
    if per_unit <= Decimal::ZERO {
        return short.units;
    }
    let fits = |n: u64| price.notional(n).mul(params.coverage_rate()) <= blocked;
    let mut k = blocked
        .value()
        .checked_div(per_unit)
        .map_or(short.units, |q| q.max(Decimal::ZERO).floor().to_u64().unwrap_or(short.units))
        .min(short.units);
    while k > 0 && !fits(k) {
        k -= 1;
    }
    while k < short.units && fits(k + 1) {
        k += 1;
    }
    k
}

/// Smallest n in lo..=hi that restores, where available after n units is
/// `base + n * slope` on that range.
fn first_restoring(lo: u64, hi: u64, base: Decimal, slope: Decimal, restores: impl Fn(u64) -> bool) -> Option<u64> {
    if lo > hi {
        return None;
    }
    if slope <= Decimal::ZERO {
        return restores(lo).then_some(lo);
    }
    let mut n = (-base)
        .checked_div(slope)
        .map_or(hi, |q| q.max(Decimal::ZERO).ceil().to_u64().unwrap_or(hi))
        .clamp(lo, hi);
    // the division can land one off either way
    while n > lo && restores(n - 1) {
        n -= 1;
    }
    while !restores(n) {
        if n == hi {
            return None;
        }
        n += 1;
    }
    Some(n)
}

/// Smallest buy-back that makes available non-negative.
///
/// The effect of n units is linear with a single kink where released
/// coverage reaches blocked, so each side is solved directly.
pub fn plan_buyback(available: Amount, blocked: Amount, short: &Lot, price: Price, params: &TradingParams) -> Buyback {
    if !available.is_negative() {
        return Buyback {
            units: 0,
            restores_solvency: true,
        };
    }
    let restores = |n: u64| !available.add(short_close_effect(n, blocked, short, price, params)).is_negative();

    let p = price.value();
    let pnl_less_fee = short.avg_price.value() - p - p * params.fee_rate();
    let k = full_release_units(blocked, short, price, params);

    let found = first_restoring(1, k, available.value(), p * params.coverage_rate() + pnl_less_fee, restores)
        .or_else(|| {
            first_restoring(
                k + 1,
                short.units,
                available.value() + blocked.value(),
                pnl_less_fee,
                restores,
            )
        });

    match found {
        Some(units) => Buyback {
            units,
            restores_solvency: true,
        },
        None => Buyback {
            units: short.units,
            restores_solvency: false,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutReport {
    pub candidates: usize,
    pub liquidations: usize,
    pub restored: usize,
    pub failed: usize,
}

pub struct StopOutProcessor {
    ledger: Arc<Ledger>,
    positions: Arc<dyn PositionStore>,
    board: Arc<RankingBoard>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: StopOutConfig,
}

impl StopOutProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        positions: Arc<dyn PositionStore>,
        board: Arc<RankingBoard>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: StopOutConfig,
    ) -> Self {
        Self {
            ledger,
            positions,
            board,
            notifier,
            clock,
            config,
        }
    }

    /// Process every margin-called account in the current leaderboard.
    pub async fn run_once(&self) -> StopOutReport {
        let snapshot = self.board.load();
        let mut report = StopOutReport::default();

        for entry in snapshot.margin_called() {
            report.candidates += 1;
            match self.stop_out_account(entry.account_id, &mut report).await {
                Ok(true) => report.restored += 1,
                Ok(false) => {
                    warn!(account_id = %entry.account_id, "Account still below zero after stop-out");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(account_id = %entry.account_id, error = %e, "Stop-out failed");
                }
            }
        }
        report
    }

    /// Returns whether available ended at zero or above.
    async fn stop_out_account(&self, id: AccountId, report: &mut StopOutReport) -> Result<bool, StopOutError> {
        let mut account = self.ledger.fresh_account(id).await?;
        let mut done = 0u32;

        while account.available.is_negative() && done < self.config.max_liquidations_per_account {
            let Some(short) = self.positions.most_expensive_short(id).await? else {
                debug!(account_id = %id, "No short left to buy back");
                break;
            };
            let instrument = self.positions.instrument(short.instrument_id).await?;
            let price = self.ledger.prices().fetch(&instrument.ticker).await?.last;

            let lot = Lot::new(short.units(), short.avg_price);
            let buyback = plan_buyback(account.available, account.blocked, &lot, price, self.ledger.params());
            if buyback.units == 0 {
                break;
            }

            let receipt = self
                .ledger
                .buy_instrument(id, short.instrument_id, buyback.units, price)
                .await?;
            done += 1;
            report.liquidations += 1;

            info!(
                account_id = %id,
                ticker = %instrument.ticker,
                units = buyback.units,
                price = %price,
                available = %receipt.account.available,
                "Short bought back"
            );
            notify_logged(
                self.notifier.as_ref(),
                id,
                AccountEvent::StoppedOut(StopOutEvent {
                    instrument_id: instrument.id,
                    ticker: instrument.ticker,
                    units: buyback.units,
                    price,
                    available_after: receipt.account.available,
                }),
            )
            .await;

            account = receipt.account;
        }

        Ok(!account.available.is_negative())
    }

    /// Run daily at the configured local time until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let at = match self.config.run_time() {
            Ok(at) => at,
            Err(e) => {
                error!(error = %e, "Stop-out schedule invalid, processor not started");
                return;
            }
        };
        let mut last_run: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            let from = last_run.map_or(now, |last| last.max(now));
            let next = next_daily_run(from, at, self.config.time_zone);
            info!(next_run = %next, "Stop-out scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stop-out processor stopped");
                    break;
                }
                _ = tokio::time::sleep(until(now, next)) => {
                    let report = self.run_once().await;
                    info!(
                        candidates = report.candidates,
                        liquidations = report.liquidations,
                        restored = report.restored,
                        failed = report.failed,
                        "Stop-out run done"
                    );
                    last_run = Some(next);
                }
            }
        }
    }
}
