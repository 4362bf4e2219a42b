// In-memory store
//
// Implements every store trait over one mutex-guarded table set. Row locks are
// per (account, instrument) tokio mutexes so a trade can hold one across await
// points; the table mutex itself is only ever held for a synchronous section.

use super::{
    AccountStore, AccountSummary, BalanceChange, CommitOutcome, MarginUpdate, OperationLog, PositionStore,
    PositionTx, Promocode, PromocodeStore, Redemption, RewardClaim, StoreError,
};
use crate::account::{Account, NewAccount};
use crate::config::StoreConfig;
use crate::instrument::Instrument;
use crate::operation::{page_count, NewOperation, Operation, OperationKind};
use crate::position::{Position, PositionSummary};
use crate::types::{AccountId, Amount, InstrumentId, OperationId, Price, Timestamp};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    positions: BTreeMap<(AccountId, InstrumentId), Position>,
    instruments: BTreeMap<InstrumentId, Instrument>,
    operations: Vec<Operation>,
    promocodes: HashMap<String, Promocode>,
    redemptions: HashSet<(AccountId, String)>,
    next_account_id: i64,
    next_instrument_id: i64,
    next_operation_id: i64,
}

impl Tables {
    fn account(&self, id: AccountId) -> Result<&Account, StoreError> {
        self.accounts.get(&id).ok_or(StoreError::AccountNotFound(id))
    }

    fn push_operation(&mut self, op: NewOperation, created_at: Timestamp) -> OperationId {
        self.next_operation_id += 1;
        let id = OperationId(self.next_operation_id);
        self.operations.push(op.into_operation(id, created_at));
        id
    }

    fn positions_of(&self, account: AccountId) -> impl Iterator<Item = &Position> {
        self.positions
            .range((account, InstrumentId(i64::MIN))..=(account, InstrumentId(i64::MAX)))
            .map(|(_, p)| p)
    }
}

#[derive(Debug)]
struct Inner {
    tables: Mutex<Tables>,
    row_locks: DashMap<(AccountId, InstrumentId), Arc<RowLock<()>>>,
    lock_timeout: Duration,
    fail_next_commit: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                lock_timeout: config.lock_timeout(),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    pub fn add_instrument(&self, ticker: &str, name: &str) -> Instrument {
        let mut tables = self.inner.tables.lock();
        tables.next_instrument_id += 1;
        let instrument = Instrument::new(InstrumentId(tables.next_instrument_id), ticker, name);
        tables.instruments.insert(instrument.id, instrument.clone());
        instrument
    }

    pub fn add_promocode(&self, code: &str, available_count: u32, bonus_amount: Amount) {
        let promo = Promocode {
            code: code.to_string(),
            available_count,
            bonus_amount,
        };
        self.inner.tables.lock().promocodes.insert(promo.code.clone(), promo);
    }

    pub fn promocode(&self, code: &str) -> Option<Promocode> {
        self.inner.tables.lock().promocodes.get(code).cloned()
    }

    /// All operations of one account, oldest first.
    pub fn operations_of(&self, account: AccountId) -> Vec<Operation> {
        self.inner
            .tables
            .lock()
            .operations
            .iter()
            .filter(|op| op.account_id == account)
            .cloned()
            .collect()
    }

    /// Make the next commit fail as if the backing store went away.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn row_lock(&self, account: AccountId, instrument: InstrumentId) -> Arc<RowLock<()>> {
        self.inner
            .row_locks
            .entry((account, instrument))
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.inner.tables.lock().account(id).cloned()
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.inner.tables.lock();
        tables.next_account_id += 1;
        let account = Account::new(
            AccountId(tables.next_account_id),
            new.name,
            new.starting_balance,
            Timestamp::now(),
        );
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_balances_and_margin_call(
        &self,
        id: AccountId,
        blocked_balance_delta: Option<Amount>,
    ) -> Result<MarginUpdate, StoreError> {
        let mut tables = self.inner.tables.lock();
        let account = tables.accounts.get_mut(&id).ok_or(StoreError::AccountNotFound(id))?;

        if let Some(delta) = blocked_balance_delta {
            let delta = delta.min(account.blocked);
            account.available = account.available.add(delta);
            account.blocked = account.blocked.sub(delta);
        }
        let (margin, transition) = account.margin.observe(account.available);
        account.margin = margin;

        Ok(MarginUpdate {
            account: account.clone(),
            transition,
        })
    }

    async fn list_accounts_with_position_summaries(&self) -> Result<Vec<AccountSummary>, StoreError> {
        let tables = self.inner.tables.lock();
        let mut summaries = Vec::with_capacity(tables.accounts.len());

        for account in tables.accounts.values() {
            let positions = tables
                .positions_of(account.id)
                .map(|p| -> Result<PositionSummary, StoreError> {
                    let instrument = tables
                        .instruments
                        .get(&p.instrument_id)
                        .ok_or(StoreError::InstrumentNotFound(p.instrument_id))?;
                    Ok(PositionSummary {
                        instrument_id: p.instrument_id,
                        ticker: instrument.ticker.clone(),
                        count: p.count,
                        avg_price: p.avg_price,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            summaries.push(AccountSummary {
                account: account.clone(),
                positions,
            });
        }
        Ok(summaries)
    }

    async fn credit_daily_reward(&self, id: AccountId, amount: Amount, today: NaiveDate) -> Result<RewardClaim, StoreError> {
        let mut tables = self.inner.tables.lock();
        let account = tables.accounts.get_mut(&id).ok_or(StoreError::AccountNotFound(id))?;
        if !account.can_claim_reward(today) {
            return Ok(RewardClaim::AlreadyClaimed);
        }

        account.available = account.available.add(amount);
        account.last_reward_on = Some(today);
        let account = account.clone();

        let operation_id = tables.push_operation(
            NewOperation::credit(id, OperationKind::DailyReward, amount),
            Timestamp::now(),
        );
        Ok(RewardClaim::Credited { account, operation_id })
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn lock_position(&self, account: AccountId, instrument: InstrumentId) -> Result<Box<dyn PositionTx>, StoreError> {
        let lock = self.row_lock(account, instrument);
        let guard = tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout { account, instrument })?;

        let position = {
            let tables = self.inner.tables.lock();
            if !tables.instruments.contains_key(&instrument) {
                return Err(StoreError::InstrumentNotFound(instrument));
            }
            tables.account(account)?;
            tables.positions.get(&(account, instrument)).cloned()
        };

        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            _row: guard,
            account_id: account,
            instrument_id: instrument,
            position,
            balance_changes: Vec::new(),
            position_write: None,
            operations: Vec::new(),
        }))
    }

    async fn get_position(&self, account: AccountId, instrument: InstrumentId) -> Result<Option<Position>, StoreError> {
        Ok(self.inner.tables.lock().positions.get(&(account, instrument)).cloned())
    }

    async fn positions(&self, account: AccountId) -> Result<Vec<Position>, StoreError> {
        let tables = self.inner.tables.lock();
        tables.account(account)?;
        Ok(tables.positions_of(account).cloned().collect())
    }

    async fn most_expensive_short(&self, account: AccountId) -> Result<Option<Position>, StoreError> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .positions_of(account)
            .filter(|p| p.count < 0)
            .max_by_key(|p| p.cost_basis())
            .cloned())
    }

    async fn instrument(&self, id: InstrumentId) -> Result<Instrument, StoreError> {
        self.inner
            .tables
            .lock()
            .instruments
            .get(&id)
            .cloned()
            .ok_or(StoreError::InstrumentNotFound(id))
    }
}

#[async_trait]
impl OperationLog for MemoryStore {
    async fn append(&self, op: NewOperation) -> Result<OperationId, StoreError> {
        let mut tables = self.inner.tables.lock();
        tables.account(op.account_id)?;
        Ok(tables.push_operation(op, Timestamp::now()))
    }

    async fn history_page(&self, account: AccountId, page: usize, per_page: usize) -> Result<Vec<Operation>, StoreError> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .operations
            .iter()
            .rev()
            .filter(|op| op.account_id == account)
            .skip(page.saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect())
    }

    async fn history_pages(&self, account: AccountId, per_page: usize) -> Result<usize, StoreError> {
        let tables = self.inner.tables.lock();
        let total = tables.operations.iter().filter(|op| op.account_id == account).count();
        Ok(page_count(total, per_page))
    }
}

#[async_trait]
impl PromocodeStore for MemoryStore {
    async fn redeem(&self, account: AccountId, code: &str) -> Result<Redemption, StoreError> {
        let mut tables = self.inner.tables.lock();
        tables.account(account)?;

        let key = (account, code.to_string());
        if tables.promocodes.contains_key(code) && tables.redemptions.contains(&key) {
            return Ok(Redemption::AlreadyUsed);
        }
        let bonus = match tables.promocodes.get_mut(code) {
            Some(promo) if promo.available_count > 0 => {
                promo.available_count -= 1;
                promo.bonus_amount
            }
            _ => return Ok(Redemption::Invalid),
        };

        tables.redemptions.insert(key);
        let row = tables.accounts.get_mut(&account).ok_or(StoreError::AccountNotFound(account))?;
        row.available = row.available.add(bonus);
        let updated = row.clone();

        let operation_id = tables.push_operation(
            NewOperation::credit(account, OperationKind::Promocode, bonus),
            Timestamp::now(),
        );
        Ok(Redemption::Credited {
            bonus,
            account: updated,
            operation_id,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum PositionWrite {
    Upsert { count: i64, avg_price: Price },
    Delete,
}

struct MemoryTx {
    inner: Arc<Inner>,
    // released on commit or drop
    _row: OwnedMutexGuard<()>,
    account_id: AccountId,
    instrument_id: InstrumentId,
    position: Option<Position>,
    balance_changes: Vec<BalanceChange>,
    position_write: Option<PositionWrite>,
    operations: Vec<(NewOperation, Option<usize>)>,
}

#[async_trait]
impl PositionTx for MemoryTx {
    fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    fn adjust_balances(&mut self, change: BalanceChange) {
        self.balance_changes.push(change);
    }

    fn upsert_position(&mut self, count: i64, avg_price: Price) {
        self.position_write = Some(PositionWrite::Upsert { count, avg_price });
    }

    fn delete_position(&mut self) {
        self.position_write = Some(PositionWrite::Delete);
    }

    fn append_operation(&mut self, op: NewOperation, parent: Option<usize>) -> usize {
        self.operations.push((op, parent));
        self.operations.len() - 1
    }

    async fn commit(self: Box<Self>) -> Result<CommitOutcome, StoreError> {
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected by backing store".to_string()));
        }

        let mut tables = self.inner.tables.lock();
        let mut account = tables.account(self.account_id)?.clone();

        for change in &self.balance_changes {
            match *change {
                BalanceChange::Adjust(amount) => {
                    account.available = account.available.add(amount);
                }
                BalanceChange::Reserve { spend, block } => {
                    let required = spend.add(block);
                    if account.available < required {
                        return Ok(CommitOutcome::Shortfall {
                            required,
                            available: account.available,
                        });
                    }
                    account.available = account.available.sub(required);
                    account.blocked = account.blocked.add(block);
                }
                BalanceChange::Release { up_to } => {
                    let released = up_to.max(Amount::zero()).min(account.blocked);
                    account.blocked = account.blocked.sub(released);
                    account.available = account.available.add(released);
                }
            }
        }

        let key = (self.account_id, self.instrument_id);
        match self.position_write {
            Some(PositionWrite::Upsert { count, avg_price }) if count != 0 => {
                tables.positions.insert(
                    key,
                    Position {
                        account_id: self.account_id,
                        instrument_id: self.instrument_id,
                        count,
                        avg_price,
                    },
                );
            }
            Some(_) => {
                tables.positions.remove(&key);
            }
            None => {}
        }

        let now = Timestamp::now();
        let mut operation_ids: Vec<OperationId> = Vec::with_capacity(self.operations.len());
        for (op, parent) in &self.operations {
            let mut op = op.clone();
            if let Some(parent_id) = parent.and_then(|i| operation_ids.get(i).copied()) {
                op.parent_id = Some(parent_id);
            }
            let id = tables.push_operation(op, now);
            operation_ids.push(id);
        }

        tables.accounts.insert(account.id, account.clone());
        Ok(CommitOutcome::Committed { account, operation_ids })
    }
}
