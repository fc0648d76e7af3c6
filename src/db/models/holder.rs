use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChainKey;

/// A MOON holder with per-chain balances (PostgreSQL).
///
/// Balances are only ever written from authoritative `balanceOf` reads.
/// `total_balance` is the sum of the three per-chain balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    pub balance_nova: f64,
    pub balance_one: f64,
    pub balance_eth: f64,
    pub total_balance: f64,
    pub username: Option<String>,
    pub label: Option<String>,
    pub last_transfer_at: Option<DateTime<Utc>>,
    pub has_outgoing: bool,
    /// Last time any per-chain balance was refreshed.
    pub balance_updated_at: Option<DateTime<Utc>>,
}

impl Holder {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            balance_nova: 0.0,
            balance_one: 0.0,
            balance_eth: 0.0,
            total_balance: 0.0,
            username: None,
            label: None,
            last_transfer_at: None,
            has_outgoing: false,
            balance_updated_at: None,
        }
    }

    pub fn balance(&self, chain: ChainKey) -> f64 {
        match chain {
            ChainKey::Nova => self.balance_nova,
            ChainKey::One => self.balance_one,
            ChainKey::Eth => self.balance_eth,
        }
    }

    /// Overwrite one chain's balance and recompute the total.
    pub fn set_balance(&mut self, chain: ChainKey, balance: f64, at: DateTime<Utc>) {
        match chain {
            ChainKey::Nova => self.balance_nova = balance,
            ChainKey::One => self.balance_one = balance,
            ChainKey::Eth => self.balance_eth = balance,
        }
        self.total_balance = self.balance_nova + self.balance_one + self.balance_eth;
        self.balance_updated_at = Some(at);
    }

    /// Fold an activity observation in. The timestamp never moves backwards
    /// and `has_outgoing` is sticky.
    pub fn record_activity(&mut self, at: DateTime<Utc>, outgoing: bool) {
        self.last_transfer_at = Some(match self.last_transfer_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
        self.has_outgoing |= outgoing;
    }
}

/// Collapse holders whose addresses differ only by case into one row.
///
/// The survivor is the row with a linked username, then the one already
/// stored lowercase. Missing username/label and activity fields are filled
/// from the losers. Returns the merged holder (address lowercased) and the
/// addresses of the rows to delete.
pub fn merge_holders(mut group: Vec<Holder>) -> Option<(Holder, Vec<String>)> {
    if group.is_empty() {
        return None;
    }

    group.sort_by_key(|h| {
        (
            h.username.is_none(),
            h.address != h.address.to_lowercase(),
            h.address.clone(),
        )
    });

    let mut winner = group.remove(0);
    let mut losers = Vec::with_capacity(group.len());

    for other in group {
        if winner.username.is_none() {
            winner.username = other.username.clone();
        }
        if winner.label.is_none() {
            winner.label = other.label.clone();
        }
        if let Some(at) = other.last_transfer_at {
            winner.record_activity(at, other.has_outgoing);
        } else {
            winner.has_outgoing |= other.has_outgoing;
        }
        losers.push(other.address);
    }

    if winner.address != winner.address.to_lowercase() {
        losers.push(winner.address.clone());
        winner.address = winner.address.to_lowercase();
    }

    Some((winner, losers))
}
