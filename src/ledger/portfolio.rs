// 8.4: portfolio view. open positions by instrument name, joined with cached quotes.

use super::core::Ledger;
use super::results::{LedgerError, PortfolioLine, PortfolioPage};
use crate::operation::page_count;
use crate::types::AccountId;

pub const POSITIONS_PER_PAGE: usize = 5;

impl Ledger {
    /// Zero-based page of the account's open positions.
    pub async fn portfolio_page(&self, account_id: AccountId, page: usize) -> Result<PortfolioPage, LedgerError> {
        let account = self.account(account_id).await?;
        let positions = self.positions.positions(account_id).await?;

        let mut lines = Vec::with_capacity(positions.len());
        for position in positions {
            let instrument = self.positions.instrument(position.instrument_id).await?;
            let last = self.prices.last(&instrument.ticker);
            lines.push(PortfolioLine {
                last,
                market_value: last.map(|p| p.notional(position.units())),
                unrealized_pnl: last.map(|p| position.unrealized_pnl(p)),
                count: position.count,
                avg_price: position.avg_price,
                instrument,
            });
        }
        lines.sort_by(|a, b| a.instrument.name.cmp(&b.instrument.name));

        let pages = page_count(lines.len(), POSITIONS_PER_PAGE);
        let lines = lines
            .into_iter()
            .skip(page.saturating_mul(POSITIONS_PER_PAGE))
            .take(POSITIONS_PER_PAGE)
            .collect();

        Ok(PortfolioPage {
            account,
            lines,
            page,
            pages,
        })
    }

    pub async fn portfolio_pages(&self, account_id: AccountId) -> Result<usize, LedgerError> {
        let positions = self.positions.positions(account_id).await?;
        Ok(page_count(positions.len(), POSITIONS_PER_PAGE))
    }
}
