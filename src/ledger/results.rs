// 8.0.2: result types and errors for ledger operations.

use crate::account::Account;
use crate::instrument::Instrument;
use crate::position::{PositionError, PositionState};
use crate::store::StoreError;
use crate::types::{AccountId, Amount, InstrumentId, OperationId, Price, Side};

#[derive(Debug, Clone)]
pub struct TradeReceipt {
    pub account: Account,
    pub side: Side,
    pub units: u64,
    pub price: Price,
    /// Units that closed the opposite lot.
    pub closed: u64,
    /// Units that opened or extended a lot on `side`.
    pub opened: u64,
    pub position: PositionState,
    pub fee: Amount,
    pub realized_pnl: Amount,
    pub operation_id: OperationId,
    pub fee_operation_id: OperationId,
}

#[derive(Debug, Clone)]
pub struct CreditReceipt {
    pub account: Account,
    pub amount: Amount,
    pub operation_id: OperationId,
}

#[derive(Debug, Clone)]
pub struct PortfolioLine {
    pub instrument: Instrument,
    pub count: i64,
    pub avg_price: Price,
    /// None until the instrument has been quoted.
    pub last: Option<Price>,
    pub market_value: Option<Amount>,
    pub unrealized_pnl: Option<Amount>,
}

#[derive(Debug, Clone)]
pub struct PortfolioPage {
    pub account: Account,
    pub lines: Vec<PortfolioLine>,
    pub page: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Unit count must be positive")]
    InvalidCount,

    #[error("Promocode {0} is not valid")]
    InvalidPromocode(String),

    #[error("Promocode {0} was already used")]
    PromocodeAlreadyUsed(String),

    #[error("Daily reward already claimed today")]
    DailyRewardUnavailable,

    #[error("Timed out waiting for position lock ({account}, {instrument})")]
    LockTimeout {
        account: AccountId,
        instrument: InstrumentId,
    },

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout { account, instrument } => LedgerError::LockTimeout { account, instrument },
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    /// Business outcome the caller should show as-is, not a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds { .. }
                | LedgerError::InvalidCount
                | LedgerError::InvalidPromocode(_)
                | LedgerError::PromocodeAlreadyUsed(_)
                | LedgerError::DailyRewardUnavailable
        )
    }

    /// Worth retrying later; nothing was applied.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout { .. } | LedgerError::Store(StoreError::Unavailable(_))
        )
    }
}
