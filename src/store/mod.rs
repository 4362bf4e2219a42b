//! Persistence seams.
//!
//! The ledger and the risk loops only see these traits. Trades go through a
//! [`PositionTx`]: it holds the (account, instrument) row lock from
//! [`PositionStore::lock_position`] until it is committed or dropped. Writes
//! are buffered and applied together on commit; dropping the transaction
//! discards them.

pub mod memory;

pub use memory::MemoryStore;

use crate::account::{Account, NewAccount};
use crate::instrument::Instrument;
use crate::margin::MarginTransition;
use crate::operation::{NewOperation, Operation};
use crate::position::{Position, PositionSummary};
use crate::types::{AccountId, Amount, InstrumentId, OperationId, Price};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Instrument {0} not found")]
    InstrumentNotFound(InstrumentId),

    #[error("Timed out waiting for position lock ({account}, {instrument})")]
    LockTimeout {
        account: AccountId,
        instrument: InstrumentId,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One balance movement inside a trade, applied in order at commit against
/// the live account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// available += amount (signed).
    Adjust(Amount),
    /// available -= spend + block, blocked += block. Rejected when available
    /// at this point is below spend + block.
    Reserve { spend: Amount, block: Amount },
    /// Moves min(blocked, up_to) from blocked back to available.
    Release { up_to: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        account: Account,
        /// Ids in the order operations were appended.
        operation_ids: Vec<OperationId>,
    },
    /// A `Reserve` could not be covered. Nothing was written.
    Shortfall { required: Amount, available: Amount },
}

/// Account row after a valuation write-back, with the margin transition the
/// written balance caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginUpdate {
    pub account: Account,
    pub transition: MarginTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub account: Account,
    pub positions: Vec<PositionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    Credited {
        bonus: Amount,
        account: Account,
        operation_id: OperationId,
    },
    /// No such code, or no uses left.
    Invalid,
    AlreadyUsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardClaim {
    Credited {
        account: Account,
        operation_id: OperationId,
    },
    AlreadyClaimed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promocode {
    pub code: String,
    pub available_count: u32,
    pub bonus_amount: Amount,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError>;

    /// available += delta, blocked -= delta (blocked is floored at zero), then
    /// move the margin state on the resulting available cash, all against the
    /// live row in one step.
    async fn update_balances_and_margin_call(
        &self,
        id: AccountId,
        blocked_balance_delta: Option<Amount>,
    ) -> Result<MarginUpdate, StoreError>;

    async fn list_accounts_with_position_summaries(&self) -> Result<Vec<AccountSummary>, StoreError>;

    /// Credit `amount` once per `today`, with a daily_reward operation.
    async fn credit_daily_reward(&self, id: AccountId, amount: Amount, today: NaiveDate) -> Result<RewardClaim, StoreError>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Take the row lock for the pair and open a transaction on it.
    async fn lock_position(&self, account: AccountId, instrument: InstrumentId) -> Result<Box<dyn PositionTx>, StoreError>;

    /// Unlocked read.
    async fn get_position(&self, account: AccountId, instrument: InstrumentId) -> Result<Option<Position>, StoreError>;

    async fn positions(&self, account: AccountId) -> Result<Vec<Position>, StoreError>;

    /// Short with the largest avg_price * |count|.
    async fn most_expensive_short(&self, account: AccountId) -> Result<Option<Position>, StoreError>;

    async fn instrument(&self, id: InstrumentId) -> Result<Instrument, StoreError>;
}

#[async_trait]
pub trait PositionTx: Send {
    /// Position row as read when the lock was taken.
    fn position(&self) -> Option<&Position>;

    fn adjust_balances(&mut self, change: BalanceChange);

    fn upsert_position(&mut self, count: i64, avg_price: Price);

    fn delete_position(&mut self);

    /// Buffer an operation; returns its index in this transaction. `parent`
    /// is the index of an earlier operation in the same transaction.
    fn append_operation(&mut self, op: NewOperation, parent: Option<usize>) -> usize;

    async fn commit(self: Box<Self>) -> Result<CommitOutcome, StoreError>;
}

#[async_trait]
pub trait OperationLog: Send + Sync {
    async fn append(&self, op: NewOperation) -> Result<OperationId, StoreError>;

    /// Newest first, zero-based page.
    async fn history_page(&self, account: AccountId, page: usize, per_page: usize) -> Result<Vec<Operation>, StoreError>;

    async fn history_pages(&self, account: AccountId, per_page: usize) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait PromocodeStore: Send + Sync {
    async fn redeem(&self, account: AccountId, code: &str) -> Result<Redemption, StoreError>;
}

/// The store handles the ledger needs, usually all backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub positions: Arc<dyn PositionStore>,
    pub operations: Arc<dyn OperationLog>,
    pub promocodes: Arc<dyn PromocodeStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: AccountStore + PositionStore + OperationLog + PromocodeStore + 'static,
    {
        Self {
            accounts: store.clone(),
            positions: store.clone(),
            operations: store.clone(),
            promocodes: store,
        }
    }
}
