// 8.0: position ledger. executes trades and credits against the store, one
// transaction per call, and keeps the read-through account cache current.

mod core;
mod credits;
mod limits;
mod portfolio;
mod results;
mod trades;

pub use self::core::Ledger;
pub use limits::{max_count_to_buy, max_count_to_sell};
pub use portfolio::POSITIONS_PER_PAGE;
pub use results::{CreditReceipt, LedgerError, PortfolioLine, PortfolioPage, TradeReceipt};
pub use trades::{plan_trade, TradePlan};
