// papertrade-core: paper-trading position ledger with margin calls and stop-out.
// risk-first architecture: balance consistency and solvency control take priority.
// collaborators (store, quotes, notifications) are traits; an in-memory store ships with the crate.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: AccountId, InstrumentId, Side, Price, Amount, Bps
//   3.x  margin.rs: MarginState hysteresis, revaluation at latest prices
//   4.x  position.rs: position rows, Flat/Long/Short state machine
//   5.x  operation.rs: append-only audit records
//   7.x  config.rs: fees, coverage, loop cadence, stop-out schedule
//   8.x  ledger/: buy/sell, max counts, promocodes, daily reward, portfolio
//   9.x  price_cache.rs: quote provider seam, per-tick refresh
//   9.1  valuation.rs: valuation + ranking loop
//   9.2  stop_out.rs: daily forced buy-back of shorts
//   9.3  schedule.rs: injectable clock, daily run times
//   10.x account.rs: account balances, read-through cache
//   11.x events.rs: account notifications
//   12.x instrument.rs: tradeable instruments
//   13.x ranking.rs: copy-on-write leaderboard snapshot
//   14.x store/: persistence traits + in-memory store
//   15.x telemetry.rs: tracing subscriber setup

// core ledger modules
pub mod account;
pub mod instrument;
pub mod ledger;
pub mod margin;
pub mod operation;
pub mod position;
pub mod store;
pub mod types;

// risk loops
pub mod ranking;
pub mod schedule;
pub mod stop_out;
pub mod valuation;

// integration modules
pub mod config;
pub mod events;
pub mod price_cache;
pub mod telemetry;

// re exports for convenience
pub use account::*;
pub use events::*;
pub use instrument::*;
pub use ledger::*;
pub use margin::*;
pub use operation::*;
pub use position::*;
pub use ranking::*;
pub use types::*;
pub use config::{AppConfig, ConfigError, LogFormat, StopOutConfig, StoreConfig, TradingParams, ValuationConfig};
pub use price_cache::{PriceCache, PriceQuote, QuoteError, QuoteProvider, RefreshReport, StaticQuotes};
pub use schedule::{Clock, ManualClock, SystemClock};
pub use stop_out::{plan_buyback, Buyback, StopOutError, StopOutProcessor, StopOutReport};
pub use store::{
    AccountStore, AccountSummary, BalanceChange, CommitOutcome, MarginUpdate, MemoryStore, OperationLog, PositionStore, PositionTx,
    PromocodeStore, Redemption, RewardClaim, StoreError, Stores,
};
pub use valuation::{TickReport, ValuationLoop};
