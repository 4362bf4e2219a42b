// 4.0: position tracking. a stored row is a signed count plus the average entry price of the open side.
// 4.1 has the state machine: Flat, Long(lot), Short(lot) with close_against/open transitions.

use crate::types::{AccountId, Amount, InstrumentId, Price, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("Cannot open {requested} while a {held} lot is still open")]
    OppositeSideOpen { held: Side, requested: Side },

    #[error("Unit count must be positive")]
    ZeroUnits,
}

/// Stored position row. `count > 0` is long, `count < 0` is short, zero rows never exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub count: i64,
    pub avg_price: Price,
}

impl Position {
    pub fn state(&self) -> PositionState {
        PositionState::from_signed(self.count, self.avg_price)
    }

    pub fn side(&self) -> Option<Side> {
        self.state().side()
    }

    pub fn units(&self) -> u64 {
        self.count.unsigned_abs()
    }

    /// Entry notional, avg_price * |count|. Stop-out ranks shorts by this.
    pub fn cost_basis(&self) -> Amount {
        self.avg_price.notional(self.units())
    }

    pub fn unrealized_pnl(&self, last: Price) -> Amount {
        self.state().unrealized_pnl(last)
    }
}

/// Position joined with its instrument ticker, as read in bulk by the valuation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub instrument_id: InstrumentId,
    pub ticker: String,
    pub count: i64,
    pub avg_price: Price,
}

impl PositionSummary {
    pub fn state(&self) -> PositionState {
        PositionState::from_signed(self.count, self.avg_price)
    }
}

// 4.1: one open side at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lot {
    pub units: u64,
    pub avg_price: Price,
}

impl Lot {
    pub fn new(units: u64, avg_price: Price) -> Self {
        Self { units, avg_price }
    }

    pub fn cost_basis(&self) -> Amount {
        self.avg_price.notional(self.units)
    }

    // volume weighted entry
    fn extend(self, units: u64, price: Price) -> Lot {
        let total = self.units + units;
        let weighted = self.avg_price.value() * Decimal::from(self.units)
            + price.value() * Decimal::from(units);
        Lot {
            units: total,
            avg_price: Price::new_unchecked(weighted / Decimal::from(total)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(Lot),
    Short(Lot),
}

/// Result of closing units against an open lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closing {
    pub closed: u64,
    /// Entry price of the closed units, `None` when nothing was closed.
    pub entry_price: Option<Price>,
    pub remaining: PositionState,
}

impl PositionState {
    pub fn from_signed(count: i64, avg_price: Price) -> Self {
        match count {
            0 => PositionState::Flat,
            c if c > 0 => PositionState::Long(Lot::new(c.unsigned_abs(), avg_price)),
            c => PositionState::Short(Lot::new(c.unsigned_abs(), avg_price)),
        }
    }

    pub fn signed_count(&self) -> i64 {
        match self {
            PositionState::Flat => 0,
            PositionState::Long(lot) => lot.units as i64,
            PositionState::Short(lot) => -(lot.units as i64),
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(_) => Some(Side::Long),
            PositionState::Short(_) => Some(Side::Short),
        }
    }

    pub fn lot(&self) -> Option<&Lot> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(lot) | PositionState::Short(lot) => Some(lot),
        }
    }

    pub fn avg_price(&self) -> Option<Price> {
        self.lot().map(|lot| lot.avg_price)
    }

    pub fn units(&self) -> u64 {
        self.lot().map_or(0, |lot| lot.units)
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    /// Close up to `units` of the lot opposite to a trade on `side`.
    /// A buy closes a short, a sell closes a long. Closing stops at Flat
    /// and never crosses to the other side.
    pub fn close_against(self, side: Side, units: u64) -> Closing {
        let (lot, rebuild): (Lot, fn(Lot) -> PositionState) = match (self, side) {
            (PositionState::Short(lot), Side::Long) => (lot, PositionState::Short),
            (PositionState::Long(lot), Side::Short) => (lot, PositionState::Long),
            _ => {
                return Closing {
                    closed: 0,
                    entry_price: None,
                    remaining: self,
                }
            }
        };

        let closed = units.min(lot.units);
        let left = lot.units - closed;
        let remaining = if left == 0 {
            PositionState::Flat
        } else {
            rebuild(Lot::new(left, lot.avg_price))
        };

        Closing {
            closed,
            entry_price: if closed > 0 { Some(lot.avg_price) } else { None },
            remaining,
        }
    }

    /// Open or extend a lot on `side`. Fails if the opposite side is still open.
    pub fn open(self, side: Side, units: u64, price: Price) -> Result<PositionState, PositionError> {
        if units == 0 {
            return Err(PositionError::ZeroUnits);
        }
        match (self, side) {
            (PositionState::Flat, Side::Long) => Ok(PositionState::Long(Lot::new(units, price))),
            (PositionState::Flat, Side::Short) => Ok(PositionState::Short(Lot::new(units, price))),
            (PositionState::Long(lot), Side::Long) => Ok(PositionState::Long(lot.extend(units, price))),
            (PositionState::Short(lot), Side::Short) => Ok(PositionState::Short(lot.extend(units, price))),
            (PositionState::Long(_), Side::Short) => Err(PositionError::OppositeSideOpen {
                held: Side::Long,
                requested: Side::Short,
            }),
            (PositionState::Short(_), Side::Long) => Err(PositionError::OppositeSideOpen {
                held: Side::Short,
                requested: Side::Long,
            }),
        }
    }

    /// Mark-to-market gain of the open lot at `last`.
    pub fn unrealized_pnl(&self, last: Price) -> Amount {
        match self {
            PositionState::Flat => Amount::zero(),
            PositionState::Long(lot) => {
                Amount::new((last.value() - lot.avg_price.value()) * Decimal::from(lot.units))
            }
            PositionState::Short(lot) => {
                Amount::new((lot.avg_price.value() - last.value()) * Decimal::from(lot.units))
            }
        }
    }
}
