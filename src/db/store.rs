use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{Burn, ChainKey, Distribution, EarnedTotal, Holder, Scope, Swap};

/// Unique-key upsert store behind every watcher, the reconciler and backfills.
///
/// All writes are idempotent: re-applying the same record leaves one row
/// with the latest field values. Unique-key conflicts are absorbed and
/// reported as success.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn upsert_burn(&self, burn: &Burn) -> anyhow::Result<()>;

    async fn upsert_swap(&self, swap: &Swap) -> anyhow::Result<()>;

    async fn upsert_distribution(&self, distribution: &Distribution) -> anyhow::Result<()>;

    /// Overwrite one chain's balance for `address`, creating the holder if
    /// needed, and return the row with its recomputed total.
    async fn set_chain_balance(
        &self,
        address: &str,
        chain: ChainKey,
        balance: f64,
    ) -> anyhow::Result<Holder>;

    /// Fold an activity observation into the holder: `last_transfer_at`
    /// keeps the latest value, `has_outgoing` is sticky once set.
    async fn record_activity(
        &self,
        address: &str,
        at: DateTime<Utc>,
        outgoing: bool,
    ) -> anyhow::Result<()>;

    async fn get_holder(&self, address: &str) -> anyhow::Result<Option<Holder>>;

    /// Holders whose balances were not refreshed since `before`, labeled
    /// ones first, then username-linked, then the rest.
    async fn stale_holders(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Holder>>;

    /// Collapse case-insensitive duplicate holders. Returns the number of
    /// rows removed.
    async fn merge_duplicate_holders(&self) -> anyhow::Result<usize>;

    async fn get_checkpoint(&self, scope: &Scope) -> anyhow::Result<Option<u64>>;

    /// Store `block` for `scope` unless a higher block is already recorded.
    async fn set_checkpoint(&self, scope: &Scope, block: u64) -> anyhow::Result<()>;

    /// Highest block among persisted records belonging to `scope`.
    async fn max_block(&self, scope: &Scope) -> anyhow::Result<Option<u64>>;

    async fn earned_totals(&self, chain: Option<ChainKey>) -> anyhow::Result<Vec<EarnedTotal>>;
}
