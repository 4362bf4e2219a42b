// 5.0: append-only audit log records. buy/sell trades, the fee linked to each trade, and cash credits.

use crate::types::{AccountId, Amount, InstrumentId, OperationId, Price, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OPERATIONS_PER_PAGE: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Buy,
    Sell,
    Fee,
    Promocode,
    DailyReward,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Buy => "buy",
            OperationKind::Sell => "sell",
            OperationKind::Fee => "fee",
            OperationKind::Promocode => "promocode",
            OperationKind::DailyReward => "daily_reward",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub account_id: AccountId,
    pub kind: OperationKind,
    pub instrument_id: Option<InstrumentId>,
    /// Trade this record belongs to (fees only).
    pub parent_id: Option<OperationId>,
    pub count: u64,
    pub price: Option<Price>,
    pub total_amount: Amount,
    pub created_at: Timestamp,
}

/// Operation before the log assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub account_id: AccountId,
    pub kind: OperationKind,
    pub instrument_id: Option<InstrumentId>,
    pub parent_id: Option<OperationId>,
    pub count: u64,
    pub price: Option<Price>,
    pub total_amount: Amount,
}

impl NewOperation {
    pub fn trade(account_id: AccountId, kind: OperationKind, instrument_id: InstrumentId, count: u64, price: Price) -> Self {
        Self {
            account_id,
            kind,
            instrument_id: Some(instrument_id),
            parent_id: None,
            count,
            price: Some(price),
            total_amount: price.notional(count),
        }
    }

    pub fn fee(account_id: AccountId, instrument_id: InstrumentId, count: u64, price: Price, amount: Amount) -> Self {
        Self {
            account_id,
            kind: OperationKind::Fee,
            instrument_id: Some(instrument_id),
            parent_id: None,
            count,
            price: Some(price),
            total_amount: amount,
        }
    }

    pub fn credit(account_id: AccountId, kind: OperationKind, amount: Amount) -> Self {
        Self {
            account_id,
            kind,
            instrument_id: None,
            parent_id: None,
            count: 0,
            price: None,
            total_amount: amount,
        }
    }

    pub fn into_operation(self, id: OperationId, created_at: Timestamp) -> Operation {
        Operation {
            id,
            account_id: self.account_id,
            kind: self.kind,
            instrument_id: self.instrument_id,
            parent_id: self.parent_id,
            count: self.count,
            price: self.price,
            total_amount: self.total_amount,
            created_at,
        }
    }
}

/// Number of pages needed for `total` items, at least one.
pub fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return 1;
    }
    total.div_ceil(per_page).max(1)
}
