use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainKey;

/// One outbound transfer from a distributor address (PostgreSQL).
///
/// Keyed by `(tx_hash, log_index)`: a single distribution transaction
/// pays many recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub tx_hash: String,
    pub log_index: u64,
    pub chain: ChainKey,
    pub distributor: String,
    pub recipient: String,
    pub amount: f64,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Summed distributions for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnedTotal {
    pub recipient: String,
    pub amount: f64,
    pub distributions: u64,
}
