//! Cash credits outside trading: promocodes and the daily reward.

use super::core::Ledger;
use super::results::{CreditReceipt, LedgerError};
use crate::store::{Redemption, RewardClaim};
use crate::types::AccountId;
use chrono::NaiveDate;

impl Ledger {
    /// Redeem `code` once for this account. The code must have uses left.
    pub async fn apply_promocode(&self, account_id: AccountId, code: &str) -> Result<CreditReceipt, LedgerError> {
        let code = code.trim();
        match self.promocodes.redeem(account_id, code).await? {
            Redemption::Credited {
                bonus,
                account,
                operation_id,
            } => {
                self.cache.put(account.clone());
                tracing::info!(account_id = %account_id, code, bonus = %bonus, "Promocode applied");
                Ok(CreditReceipt {
                    account,
                    amount: bonus,
                    operation_id,
                })
            }
            Redemption::Invalid => {
                tracing::debug!(account_id = %account_id, code, "Promocode rejected");
                Err(LedgerError::InvalidPromocode(code.to_string()))
            }
            Redemption::AlreadyUsed => Err(LedgerError::PromocodeAlreadyUsed(code.to_string())),
        }
    }

    /// Credit the daily reward; `today` is the calendar day in the configured zone.
    pub async fn claim_daily_reward(&self, account_id: AccountId, today: NaiveDate) -> Result<CreditReceipt, LedgerError> {
        let amount = self.params.daily_reward();
        match self.accounts.credit_daily_reward(account_id, amount, today).await? {
            RewardClaim::Credited { account, operation_id } => {
                self.cache.put(account.clone());
                tracing::info!(account_id = %account_id, %today, amount = %amount, "Daily reward credited");
                Ok(CreditReceipt {
                    account,
                    amount,
                    operation_id,
                })
            }
            RewardClaim::AlreadyClaimed => Err(LedgerError::DailyRewardUnavailable),
        }
    }
}
