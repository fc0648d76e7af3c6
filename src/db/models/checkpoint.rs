use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainKey;

/// What a checkpoint tracks progress for.
///
/// Rendered as the string key of the `ledger.checkpoints` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Live monitor watermark for a chain.
    Monitor(ChainKey),
    Burns(ChainKey),
    Swaps { chain: ChainKey, dex: String },
    Distributor { chain: ChainKey, distributor: String },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Monitor(chain) => write!(f, "monitor:{}", chain.key()),
            Scope::Burns(chain) => write!(f, "burns:{}", chain.key()),
            Scope::Swaps { chain, dex } => write!(f, "swaps:{}:{}", chain.key(), dex),
            Scope::Distributor { chain, distributor } => {
                write!(f, "distributor:{}:{}", distributor, chain.key())
            },
        }
    }
}

/// Last fully processed block for a scope (PostgreSQL).
///
/// Only ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scope: String,
    pub block_number: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(scope: &Scope, block_number: u64) -> Self {
        Self {
            scope: scope.to_string(),
            block_number,
            updated_at: Utc::now(),
        }
    }
}
