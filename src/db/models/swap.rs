use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainKey;

/// Direction of a swap relative to the MOON leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwapAction {
    Bought,
    Sold,
}

impl SwapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapAction::Bought => "BOUGHT",
            SwapAction::Sold => "SOLD",
        }
    }
}

impl fmt::Display for SwapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DEX trade touching MOON (PostgreSQL).
///
/// Keyed by transaction hash. `token_in`/`amount_in` is what the maker
/// paid, `token_out`/`amount_out` what they received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub tx_hash: String,
    pub chain: ChainKey,
    pub dex: String,
    pub action: SwapAction,
    pub token_in: String,
    pub amount_in: f64,
    pub token_out: String,
    pub amount_out: f64,
    pub maker: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

impl Swap {
    /// MOON volume of the trade.
    pub fn moon_amount(&self) -> f64 {
        match self.action {
            SwapAction::Bought => self.amount_out,
            SwapAction::Sold => self.amount_in,
        }
    }

    /// Quote-token amount of the trade.
    pub fn quote_amount(&self) -> f64 {
        match self.action {
            SwapAction::Bought => self.amount_in,
            SwapAction::Sold => self.amount_out,
        }
    }

    pub fn quote_symbol(&self) -> &str {
        match self.action {
            SwapAction::Bought => &self.token_in,
            SwapAction::Sold => &self.token_out,
        }
    }

    /// Quote tokens paid per MOON, 0 when the MOON leg is empty.
    pub fn price(&self) -> f64 {
        let moon = self.moon_amount();
        if moon > 0.0 {
            self.quote_amount() / moon
        } else {
            0.0
        }
    }
}
