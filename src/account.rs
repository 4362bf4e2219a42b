//! Accounts and their cash balances.
//!
//! Cash is split into `available` (spendable, may go negative under a margin
//! call) and `blocked` (coverage posted against open shorts, never negative).
//! Their sum is the cash component of equity.

use crate::margin::MarginState;
use crate::types::{AccountId, Amount, Timestamp};
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub available: Amount,
    pub blocked: Amount,
    pub margin: MarginState,
    pub last_reward_on: Option<NaiveDate>,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>, starting_balance: Amount, created_at: Timestamp) -> Self {
        Self {
            id,
            name: name.into(),
            available: starting_balance,
            blocked: Amount::zero(),
            margin: MarginState::Solvent,
            last_reward_on: None,
            created_at,
        }
    }

    pub fn cash(&self) -> Amount {
        self.available.add(self.blocked)
    }

    pub fn is_margin_called(&self) -> bool {
        self.margin.is_called()
    }

    pub fn can_claim_reward(&self, today: NaiveDate) -> bool {
        self.last_reward_on.map_or(true, |last| last < today)
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub starting_balance: Amount,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, starting_balance: Amount) -> Self {
        Self {
            name: name.into(),
            starting_balance,
        }
    }
}

/// Read-through copy of accounts for presentation reads. Writers refresh it
/// after every committed change; a miss falls through to the store.
#[derive(Debug, Default)]
pub struct AccountCache {
    accounts: DashMap<AccountId, Account>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|entry| entry.value().clone())
    }

    pub fn put(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
