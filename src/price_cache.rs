// Price Cache
//
// Latest known quote per ticker. The valuation loop refreshes every ticker with
// an open position once per tick; presentation code and the stop-out job read
// from here. Quotes are replaced wholesale on refresh, there is no eviction.

use crate::types::{Price, Timestamp};
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// One quote as returned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub ticker: String,
    pub last: Price,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    /// Session change, as reported by the provider
    pub change: Decimal,
    pub fetched_at: Timestamp,
}

impl PriceQuote {
    pub fn last_only(ticker: impl Into<String>, last: Price) -> Self {
        Self {
            ticker: ticker.into(),
            last,
            bid: None,
            ask: None,
            change: Decimal::ZERO,
            fetched_at: Timestamp::now(),
        }
    }

    /// Price a buyer pays: ask when quoted, else last
    pub fn buy_price(&self) -> Price {
        self.ask.unwrap_or(self.last)
    }

    /// Price a seller receives: bid when quoted, else last
    pub fn sell_price(&self) -> Price {
        self.bid.unwrap_or(self.last)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteError {
    #[error("Quote for {0} unavailable: {1}")]
    Unavailable(String, String),

    #[error("Quote for {0} timed out")]
    Timeout(String),

    #[error("Unknown ticker {0}")]
    UnknownTicker(String),
}

/// External quote source. Network and timeout failures are expected.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn get_last_price(&self, ticker: &str) -> Result<PriceQuote, QuoteError>;
}

/// Prices usable this tick, plus the tickers that failed
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub prices: HashMap<String, Price>,
    pub failed: Vec<String>,
}

pub struct PriceCache {
    provider: Arc<dyn QuoteProvider>,
    quotes: RwLock<HashMap<String, PriceQuote>>,
    timeout: Duration,
}

impl PriceCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            quotes: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn get(&self, ticker: &str) -> Option<PriceQuote> {
        self.quotes.read().get(ticker).cloned()
    }

    pub fn last(&self, ticker: &str) -> Option<Price> {
        self.quotes.read().get(ticker).map(|q| q.last)
    }

    pub fn insert(&self, quote: PriceQuote) {
        self.quotes.write().insert(quote.ticker.clone(), quote);
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Fetch a live quote, bounded by the configured timeout, and cache it.
    pub async fn fetch(&self, ticker: &str) -> Result<PriceQuote, QuoteError> {
        let quote = match tokio::time::timeout(self.timeout, self.provider.get_last_price(ticker)).await {
            Ok(result) => result?,
            Err(_) => return Err(QuoteError::Timeout(ticker.to_string())),
        };
        self.insert(quote.clone());
        Ok(quote)
    }

    /// Fetch every ticker concurrently. A failed ticker is logged and left out
    /// of this tick's prices; its older cached quote stays readable.
    pub async fn refresh<I>(&self, tickers: I) -> RefreshReport
    where
        I: IntoIterator<Item = String>,
    {
        let unique: BTreeSet<String> = tickers.into_iter().collect();
        let results = join_all(unique.iter().map(|ticker| self.fetch(ticker))).await;

        let mut report = RefreshReport::default();
        for (ticker, result) in unique.into_iter().zip(results) {
            match result {
                Ok(quote) => {
                    report.prices.insert(ticker, quote.last);
                }
                Err(e) => {
                    tracing::warn!(ticker = %ticker, error = %e, "Quote refresh failed");
                    report.failed.push(ticker);
                }
            }
        }

        tracing::debug!(
            fetched = report.prices.len(),
            failed = report.failed.len(),
            "Price cache refreshed"
        );
        report
    }
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("tickers", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Fixed price table, for tests and the simulator's bootstrap.
#[derive(Debug, Default)]
pub struct StaticQuotes {
    prices: RwLock<HashMap<String, Price>>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ticker: &str, price: Price) {
        self.prices.write().insert(ticker.to_string(), price);
    }

    pub fn remove(&self, ticker: &str) {
        self.prices.write().remove(ticker);
    }
}

#[async_trait]
impl QuoteProvider for StaticQuotes {
    async fn get_last_price(&self, ticker: &str) -> Result<PriceQuote, QuoteError> {
        self.prices
            .read()
            .get(ticker)
            .map(|p| PriceQuote::last_only(ticker, *p))
            .ok_or_else(|| QuoteError::UnknownTicker(ticker.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Stalled;

    #[async_trait]
    impl QuoteProvider for Stalled {
        async fn get_last_price(&self, ticker: &str) -> Result<PriceQuote, QuoteError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(QuoteError::Unavailable(ticker.to_string(), "stalled".to_string()))
        }
    }

    fn px(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    #[tokio::test]
    async fn refresh_splits_fresh_and_failed() {
        let quotes = Arc::new(StaticQuotes::new());
        quotes.set("SBER", px(dec!(250)));
        let cache = PriceCache::new(quotes, Duration::from_secs(1));

        let report = cache
            .refresh(vec!["SBER".to_string(), "NOPE".to_string(), "SBER".to_string()])
            .await;

        assert_eq!(report.prices.get("SBER"), Some(&px(dec!(250))));
        assert_eq!(report.failed, vec!["NOPE".to_string()]);
        assert_eq!(cache.last("SBER"), Some(px(dec!(250))));
        assert!(cache.get("NOPE").is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_old_quote_readable() {
        let quotes = Arc::new(StaticQuotes::new());
        quotes.set("GAZP", px(dec!(160)));
        let cache = PriceCache::new(quotes.clone(), Duration::from_secs(1));
        cache.refresh(vec!["GAZP".to_string()]).await;

        quotes.remove("GAZP");
        let report = cache.refresh(vec!["GAZP".to_string()]).await;

        assert!(report.prices.is_empty());
        assert_eq!(cache.last("GAZP"), Some(px(dec!(160))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let cache = PriceCache::new(Arc::new(Stalled), Duration::from_millis(500));
        let err = cache.fetch("LKOH").await.unwrap_err();
        assert!(matches!(err, QuoteError::Timeout(t) if t == "LKOH"));
    }

    #[test]
    fn buy_and_sell_prices_fall_back_to_last() {
        let mut quote = PriceQuote::last_only("X", px(dec!(10)));
        assert_eq!(quote.buy_price(), px(dec!(10)));
        quote.bid = Some(px(dec!(9.9)));
        quote.ask = Some(px(dec!(10.1)));
        assert_eq!(quote.buy_price(), px(dec!(10.1)));
        assert_eq!(quote.sell_price(), px(dec!(9.9)));
    }
}
