// 8.0 ledger/core.rs: the ledger. holds the store handles, the price cache and the account cache.

use super::results::LedgerError;
use crate::account::{Account, AccountCache, NewAccount};
use crate::config::TradingParams;
use crate::price_cache::PriceCache;
use crate::store::{AccountStore, OperationLog, PositionStore, PromocodeStore, Stores};
use crate::types::AccountId;
use std::sync::Arc;

/** 8.1: entry point for every user-initiated balance or position change */
pub struct Ledger {
    pub(super) accounts: Arc<dyn AccountStore>,
    pub(super) positions: Arc<dyn PositionStore>,
    pub(super) operations: Arc<dyn OperationLog>,
    pub(super) promocodes: Arc<dyn PromocodeStore>,
    pub(super) prices: Arc<PriceCache>,
    pub(super) cache: Arc<AccountCache>,
    pub(super) params: TradingParams,
}

impl Ledger {
    pub fn new(stores: Stores, prices: Arc<PriceCache>, cache: Arc<AccountCache>, params: TradingParams) -> Self {
        Self {
            accounts: stores.accounts,
            positions: stores.positions,
            operations: stores.operations,
            promocodes: stores.promocodes,
            prices,
            cache,
            params,
        }
    }

    pub fn params(&self) -> &TradingParams {
        &self.params
    }

    pub fn prices(&self) -> &Arc<PriceCache> {
        &self.prices
    }

    pub fn operations(&self) -> &Arc<dyn OperationLog> {
        &self.operations
    }

    pub async fn open_account(&self, name: &str) -> Result<Account, LedgerError> {
        let account = self
            .accounts
            .create_account(NewAccount::new(name, self.params.starting_balance()))
            .await?;
        self.cache.put(account.clone());
        tracing::info!(account_id = %account.id, balance = %account.available, "Account opened");
        Ok(account)
    }

    /// Read-through cached account view.
    pub async fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        if let Some(account) = self.cache.get(id) {
            return Ok(account);
        }
        let account = self.accounts.get_account(id).await?;
        self.cache.put(account.clone());
        Ok(account)
    }

    /// Uncached read straight from the store.
    pub async fn fresh_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        let account = self.accounts.get_account(id).await?;
        self.cache.put(account.clone());
        Ok(account)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("params", &self.params)
            .field("cached_accounts", &self.cache.len())
            .finish()
    }
}
