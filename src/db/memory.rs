//! In-process ledger store.
//!
//! Backs the test suite. Mirrors the PostgreSQL upsert
//! semantics so both stores converge on the same state for the same input.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::db::{
    models::{
        merge_holders, Burn, ChainKey, Distribution, EarnedTotal, Holder, Scope, Swap,
    },
    LedgerStore,
};

#[derive(Default)]
struct State {
    holders: BTreeMap<String, Holder>,
    burns: BTreeMap<String, Burn>,
    swaps: BTreeMap<String, Swap>,
    distributions: BTreeMap<(String, u64), Distribution>,
    checkpoints: FxHashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn burns(&self) -> Vec<Burn> {
        self.state.read().await.burns.values().cloned().collect()
    }

    pub async fn swaps(&self) -> Vec<Swap> {
        self.state.read().await.swaps.values().cloned().collect()
    }

    pub async fn distributions(&self) -> Vec<Distribution> {
        self.state.read().await.distributions.values().cloned().collect()
    }

    pub async fn holders(&self) -> Vec<Holder> {
        self.state.read().await.holders.values().cloned().collect()
    }

    /// Insert a holder row verbatim, bypassing address normalization.
    pub async fn put_holder(&self, holder: Holder) {
        self.state
            .write()
            .await
            .holders
            .insert(holder.address.clone(), holder);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn upsert_burn(&self, burn: &Burn) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .burns
            .insert(burn.tx_hash.clone(), burn.clone());
        Ok(())
    }

    async fn upsert_swap(&self, swap: &Swap) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .swaps
            .insert(swap.tx_hash.clone(), swap.clone());
        Ok(())
    }

    async fn upsert_distribution(&self, distribution: &Distribution) -> anyhow::Result<()> {
        self.state.write().await.distributions.insert(
            (distribution.tx_hash.clone(), distribution.log_index),
            distribution.clone(),
        );
        Ok(())
    }

    async fn set_chain_balance(
        &self,
        address: &str,
        chain: ChainKey,
        balance: f64,
    ) -> anyhow::Result<Holder> {
        let mut state = self.state.write().await;
        let holder = state
            .holders
            .entry(address.to_string())
            .or_insert_with(|| Holder::new(address));
        holder.set_balance(chain, balance, Utc::now());
        Ok(holder.clone())
    }

    async fn record_activity(
        &self,
        address: &str,
        at: DateTime<Utc>,
        outgoing: bool,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state
            .holders
            .entry(address.to_string())
            .or_insert_with(|| Holder::new(address))
            .record_activity(at, outgoing);
        Ok(())
    }

    async fn get_holder(&self, address: &str) -> anyhow::Result<Option<Holder>> {
        Ok(self.state.read().await.holders.get(address).cloned())
    }

    async fn stale_holders(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Holder>> {
        let state = self.state.read().await;
        let mut stale: Vec<Holder> = state
            .holders
            .values()
            .filter(|h| h.balance_updated_at.map_or(true, |at| at < before))
            .cloned()
            .collect();

        stale.sort_by_key(|h| (h.label.is_none(), h.username.is_none(), h.balance_updated_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn merge_duplicate_holders(&self) -> anyhow::Result<usize> {
        let mut state = self.state.write().await;

        let mut groups: BTreeMap<String, Vec<Holder>> = BTreeMap::new();
        for holder in state.holders.values() {
            groups
                .entry(holder.address.to_lowercase())
                .or_default()
                .push(holder.clone());
        }

        let mut removed = 0;
        for group in groups.into_values().filter(|g| g.len() > 1) {
            let size = group.len();
            if let Some((merged, losers)) = merge_holders(group) {
                for address in &losers {
                    state.holders.remove(address);
                }
                state.holders.insert(merged.address.clone(), merged);
                removed += size - 1;
            }
        }

        Ok(removed)
    }

    async fn get_checkpoint(&self, scope: &Scope) -> anyhow::Result<Option<u64>> {
        Ok(self
            .state
            .read()
            .await
            .checkpoints
            .get(&scope.to_string())
            .copied())
    }

    async fn set_checkpoint(&self, scope: &Scope, block: u64) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let entry = state.checkpoints.entry(scope.to_string()).or_insert(block);
        *entry = (*entry).max(block);
        Ok(())
    }

    async fn max_block(&self, scope: &Scope) -> anyhow::Result<Option<u64>> {
        let state = self.state.read().await;
        let max = match scope {
            Scope::Monitor(_) => None,
            Scope::Burns(chain) => state
                .burns
                .values()
                .filter(|b| b.chain == *chain)
                .map(|b| b.block_number)
                .max(),
            Scope::Swaps { chain, dex } => state
                .swaps
                .values()
                .filter(|s| s.chain == *chain && s.dex == *dex)
                .map(|s| s.block_number)
                .max(),
            Scope::Distributor { chain, distributor } => state
                .distributions
                .values()
                .filter(|d| d.chain == *chain && d.distributor == *distributor)
                .map(|d| d.block_number)
                .max(),
        };
        Ok(max)
    }

    async fn earned_totals(&self, chain: Option<ChainKey>) -> anyhow::Result<Vec<EarnedTotal>> {
        let state = self.state.read().await;
        let mut totals: BTreeMap<String, EarnedTotal> = BTreeMap::new();

        for d in state
            .distributions
            .values()
            .filter(|d| chain.map_or(true, |c| d.chain == c))
        {
            let total = totals
                .entry(d.recipient.clone())
                .or_insert_with(|| EarnedTotal {
                    recipient: d.recipient.clone(),
                    amount: 0.0,
                    distributions: 0,
                });
            total.amount += d.amount;
            total.distributions += 1;
        }

        let mut totals: Vec<EarnedTotal> = totals.into_values().collect();
        totals.sort_by(|a, b| b.amount.total_cmp(&a.amount));
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burn(hash: &str, amount: f64, block: u64) -> Burn {
        Burn {
            tx_hash: hash.to_string(),
            chain: ChainKey::Nova,
            sender: "0xa".to_string(),
            amount,
            block_number: block,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_burn_is_idempotent() {
        let store = MemoryStore::new();
        store.upsert_burn(&burn("0x01", 500.0, 10)).await.unwrap();
        store.upsert_burn(&burn("0x01", 501.0, 10)).await.unwrap();

        let burns = store.burns().await;
        assert_eq!(burns.len(), 1);
        assert_eq!(burns[0].amount, 501.0);
    }

    #[tokio::test]
    async fn test_checkpoint_never_decreases() {
        let store = MemoryStore::new();
        let scope = Scope::Monitor(ChainKey::One);

        store.set_checkpoint(&scope, 100).await.unwrap();
        store.set_checkpoint(&scope, 40).await.unwrap();

        assert_eq!(store.get_checkpoint(&scope).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_max_block_is_scoped_by_chain() {
        let store = MemoryStore::new();
        store.upsert_burn(&burn("0x01", 1.0, 10)).await.unwrap();
        let mut eth = burn("0x02", 1.0, 99);
        eth.chain = ChainKey::Eth;
        store.upsert_burn(&eth).await.unwrap();

        assert_eq!(
            store.max_block(&Scope::Burns(ChainKey::Nova)).await.unwrap(),
            Some(10)
        );
        assert_eq!(
            store.max_block(&Scope::Burns(ChainKey::One)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_stale_holders_prioritized() {
        let store = MemoryStore::new();
        let fresh_cutoff = Utc::now() + chrono::Duration::minutes(1);

        store.put_holder(Holder::new("0x03")).await;
        let mut named = Holder::new("0x02");
        named.username = Some("alice".to_string());
        store.put_holder(named).await;
        let mut labeled = Holder::new("0x01");
        labeled.label = Some("Kraken".to_string());
        store.put_holder(labeled).await;

        let stale = store.stale_holders(fresh_cutoff, 10).await.unwrap();
        let order: Vec<&str> = stale.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(order, vec!["0x01", "0x02", "0x03"]);
    }

    #[tokio::test]
    async fn test_merge_duplicates() {
        let store = MemoryStore::new();
        let mut upper = Holder::new("0xAB");
        upper.username = Some("bob".to_string());
        store.put_holder(upper).await;
        store.put_holder(Holder::new("0xab")).await;
        store.put_holder(Holder::new("0xcd")).await;

        let removed = store.merge_duplicate_holders().await.unwrap();

        assert_eq!(removed, 1);
        let holders = store.holders().await;
        assert_eq!(holders.len(), 2);
        let merged = store.get_holder("0xab").await.unwrap().unwrap();
        assert_eq!(merged.username.as_deref(), Some("bob"));
    }
}
