// 13.0: leaderboard. a snapshot is built off to the side, sorted, and swapped in whole.
// 13.1 RankingBoard holds the current snapshot; the write lock covers only the pointer swap.

use crate::margin::MarginState;
use crate::operation::page_count;
use crate::types::{AccountId, Amount, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ACCOUNTS_PER_PAGE: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub account_id: AccountId,
    pub name: String,
    pub available: Amount,
    pub blocked: Amount,
    pub total: Amount,
    pub margin: MarginState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingSnapshot {
    entries: Vec<RankingEntry>,
    built_at: Option<Timestamp>,
}

impl RankingSnapshot {
    /// Sorts by total balance, highest first. Ties keep input order.
    pub fn new(mut entries: Vec<RankingEntry>, built_at: Timestamp) -> Self {
        entries.sort_by(|a, b| b.total.cmp(&a.total));
        Self {
            entries,
            built_at: Some(built_at),
        }
    }

    pub fn entries(&self) -> &[RankingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn built_at(&self) -> Option<Timestamp> {
        self.built_at
    }

    /// Zero-based page; out-of-range pages are empty.
    pub fn page(&self, page: usize, per_page: usize) -> &[RankingEntry] {
        let start = page.saturating_mul(per_page).min(self.entries.len());
        let end = start.saturating_add(per_page).min(self.entries.len());
        &self.entries[start..end]
    }

    pub fn pages(&self, per_page: usize) -> usize {
        page_count(self.entries.len(), per_page)
    }

    /// One-based leaderboard position.
    pub fn position_of(&self, account_id: AccountId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.account_id == account_id)
            .map(|i| i + 1)
    }

    pub fn margin_called(&self) -> impl Iterator<Item = &RankingEntry> {
        self.entries.iter().filter(|e| e.margin.is_called())
    }
}

/// Single writer (the valuation loop), many readers.
#[derive(Debug, Default)]
pub struct RankingBoard {
    current: RwLock<Arc<RankingSnapshot>>,
}

impl RankingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<RankingSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, snapshot: RankingSnapshot) {
        let next = Arc::new(snapshot);
        *self.current.write() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: i64, total: rust_decimal::Decimal, margin: MarginState) -> RankingEntry {
        RankingEntry {
            account_id: AccountId(id),
            name: format!("user{id}"),
            available: Amount::new(total),
            blocked: Amount::zero(),
            total: Amount::new(total),
            margin,
        }
    }

    #[test]
    fn sorted_by_total_descending() {
        let snapshot = RankingSnapshot::new(
            vec![
                entry(1, dec!(10), MarginState::Solvent),
                entry(2, dec!(30), MarginState::Solvent),
                entry(3, dec!(-5), MarginState::MarginCalled),
                entry(4, dec!(20), MarginState::Solvent),
            ],
            Timestamp::from_millis(1),
        );

        let ids: Vec<i64> = snapshot.entries().iter().map(|e| e.account_id.0).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
        assert_eq!(snapshot.position_of(AccountId(1)), Some(3));
        assert_eq!(snapshot.position_of(AccountId(99)), None);
        assert_eq!(snapshot.margin_called().count(), 1);
    }

    #[test]
    fn pages_slice_entries() {
        let entries = (0..20).map(|i| entry(i, dec!(100) - rust_decimal::Decimal::from(i), MarginState::Solvent)).collect();
        let snapshot = RankingSnapshot::new(entries, Timestamp::from_millis(1));

        assert_eq!(snapshot.pages(ACCOUNTS_PER_PAGE), 2);
        assert_eq!(snapshot.page(0, ACCOUNTS_PER_PAGE).len(), 15);
        assert_eq!(snapshot.page(1, ACCOUNTS_PER_PAGE).len(), 5);
        assert!(snapshot.page(7, ACCOUNTS_PER_PAGE).is_empty());
    }

    #[test]
    fn readers_keep_their_snapshot_across_publish() {
        let board = RankingBoard::new();
        assert!(board.load().is_empty());

        board.publish(RankingSnapshot::new(vec![entry(1, dec!(1), MarginState::Solvent)], Timestamp::from_millis(1)));
        let held = board.load();

        board.publish(RankingSnapshot::new(
            vec![entry(1, dec!(1), MarginState::Solvent), entry(2, dec!(2), MarginState::Solvent)],
            Timestamp::from_millis(2),
        ));

        assert_eq!(held.len(), 1);
        assert_eq!(board.load().len(), 2);
    }
}
