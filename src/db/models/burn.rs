use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainKey;

/// A MOON burn: a Transfer to the dead address (PostgreSQL).
///
/// Keyed by transaction hash. Re-observing the same hash updates
/// the non-identity fields only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burn {
    pub tx_hash: String,
    pub chain: ChainKey,
    pub sender: String,
    pub amount: f64,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}
