//! Valuation and ranking loop.
//!
//! Every tick: refresh quotes for all held tickers, revalue each account,
//! write back the coverage delta (the store moves the margin state on the
//! written row), then publish a freshly sorted leaderboard. An account holding a ticker whose quote failed this
//! tick is left untouched and keeps its previous leaderboard entry.

use crate::account::AccountCache;
use crate::config::{TradingParams, ValuationConfig};
use crate::events::{notify_logged, AccountEvent, MarginCallEvent, Notifier};
use crate::margin::{revalue, total_balance, MarginTransition};
use crate::price_cache::PriceCache;
use crate::ranking::{RankingBoard, RankingEntry, RankingSnapshot};
use crate::store::{AccountStore, StoreError};
use crate::types::Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub revalued: usize,
    /// Accounts left for next tick because a quote was missing.
    pub skipped: usize,
    /// Accounts whose write-back failed.
    pub failed: usize,
    pub raised: usize,
    pub cleared: usize,
    pub ranked: usize,
}

pub struct ValuationLoop {
    accounts: Arc<dyn AccountStore>,
    prices: Arc<PriceCache>,
    board: Arc<RankingBoard>,
    cache: Arc<AccountCache>,
    notifier: Arc<dyn Notifier>,
    params: TradingParams,
    interval: Duration,
}

impl ValuationLoop {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        prices: Arc<PriceCache>,
        board: Arc<RankingBoard>,
        cache: Arc<AccountCache>,
        notifier: Arc<dyn Notifier>,
        params: TradingParams,
        config: &ValuationConfig,
    ) -> Self {
        Self {
            accounts,
            prices,
            board,
            cache,
            notifier,
            params,
            interval: config.interval(),
        }
    }

    /// One full pass. Only the bulk read can fail the whole tick.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let summaries = self.accounts.list_accounts_with_position_summaries().await?;
        let tickers: Vec<String> = summaries
            .iter()
            .flat_map(|s| s.positions.iter().map(|p| p.ticker.clone()))
            .collect();
        let refresh = self.prices.refresh(tickers).await;
        let previous = self.board.load();

        let mut report = TickReport::default();
        let mut entries = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let id = summary.account.id;
            let revaluation = match revalue(&summary.account, &summary.positions, &refresh.prices, &self.params) {
                Ok(r) => r,
                Err(missing) => {
                    debug!(account_id = %id, reason = %missing, "Account skipped this tick");
                    report.skipped += 1;
                    if let Some(entry) = previous.entries().iter().find(|e| e.account_id == id) {
                        entries.push(entry.clone());
                    }
                    continue;
                }
            };

            let delta = (!revaluation.blocked_delta.is_zero()).then_some(revaluation.blocked_delta);
            // margin is decided by the store on the row it writes, not on this tick's read
            let update = match self.accounts.update_balances_and_margin_call(id, delta).await {
                Ok(update) => update,
                Err(e) => {
                    warn!(account_id = %id, error = %e, "Balance write-back failed");
                    report.failed += 1;
                    if let Some(entry) = previous.entries().iter().find(|e| e.account_id == id) {
                        entries.push(entry.clone());
                    }
                    continue;
                }
            };
            let account = update.account;
            self.cache.put(account.clone());
            report.revalued += 1;

            let total = total_balance(&account, revaluation.gross_long_value);
            let event = MarginCallEvent {
                available: account.available,
                blocked: account.blocked,
                total,
            };
            match update.transition {
                MarginTransition::Raised => {
                    report.raised += 1;
                    warn!(account_id = %id, available = %account.available, "Margin call raised");
                    notify_logged(self.notifier.as_ref(), id, AccountEvent::MarginCallRaised(event)).await;
                }
                MarginTransition::Cleared => {
                    report.cleared += 1;
                    info!(account_id = %id, available = %account.available, "Margin call cleared");
                    notify_logged(self.notifier.as_ref(), id, AccountEvent::MarginCallCleared(event)).await;
                }
                MarginTransition::Unchanged => {}
            }

            entries.push(RankingEntry {
                account_id: id,
                name: account.name,
                available: account.available,
                blocked: account.blocked,
                total,
                margin: account.margin,
            });
        }

        report.ranked = entries.len();
        self.board.publish(RankingSnapshot::new(entries, Timestamp::now()));
        Ok(report)
    }

    /// Tick on the configured interval until cancelled. A tick in progress
    /// finishes before the loop checks for cancellation again.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Valuation loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Valuation loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => debug!(
                            revalued = report.revalued,
                            skipped = report.skipped,
                            failed = report.failed,
                            raised = report.raised,
                            cleared = report.cleared,
                            ranked = report.ranked,
                            "Valuation tick done"
                        ),
                        Err(e) => warn!(error = %e, "Valuation tick failed"),
                    }
                }
            }
        }
    }
}
