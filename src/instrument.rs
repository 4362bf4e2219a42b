// 12.0: tradeable instruments. the ticker is what the quote provider is asked for.

use crate::types::InstrumentId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub ticker: String,
    pub name: String,
}

impl Instrument {
    pub fn new(id: InstrumentId, ticker: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            ticker: ticker.into(),
            name: name.into(),
        }
    }
}
