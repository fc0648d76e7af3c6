use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, B256};
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use moka::future::Cache;

use crate::{
    db::{models::ChainKey, LedgerStore},
    notify::Notifier,
    rpc::ProviderPool,
};

/// Block timestamps and transaction senders never change once mined.
const CACHE_CAPACITY: u64 = 10_000;
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Everything a watcher needs for one chain.
///
/// One instance per chain, shared by that chain's monitor, watchers,
/// backfills and the balance reconciler.
pub struct ChainContext {
    pub chain: ChainKey,
    /// MOON contract on this chain.
    pub token: Address,
    pub explorer_url: String,
    pub pool: ProviderPool,
    pub store: Arc<dyn LedgerStore>,
    pub notifier: Arc<dyn Notifier>,
    senders: Cache<B256, Address>,
    timestamps: Cache<u64, DateTime<Utc>>,
}

impl ChainContext {
    pub fn new(
        chain: ChainKey,
        token: Address,
        explorer_url: String,
        pool: ProviderPool,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            chain,
            token,
            explorer_url,
            pool,
            store,
            notifier,
            senders: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            timestamps: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Timestamp of `block`. Errors when no provider can produce it, so the
    /// caller holds the chunk instead of stamping records with a guess.
    pub async fn block_time(&self, block: u64) -> anyhow::Result<DateTime<Utc>> {
        if let Some(at) = self.timestamps.get(&block).await {
            return Ok(at);
        }

        let ts = self
            .pool
            .block_timestamp(block)
            .await
            .with_context(|| format!("[{}] Failed to fetch timestamp for block {}", self.chain, block))?
            .with_context(|| format!("[{}] Block {} not found", self.chain, block))?;
        let at = Utc
            .timestamp_opt(ts as i64, 0)
            .single()
            .with_context(|| format!("[{}] Block {} has invalid timestamp {}", self.chain, block, ts))?;

        self.timestamps.insert(block, at).await;
        Ok(at)
    }

    /// Origin sender of a transaction, `None` when it cannot be fetched.
    pub async fn tx_sender(&self, hash: B256) -> Option<Address> {
        if let Some(sender) = self.senders.get(&hash).await {
            return Some(sender);
        }

        match self.pool.transaction_sender(hash).await {
            Ok(Some(sender)) => {
                self.senders.insert(hash, sender).await;
                Some(sender)
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] Failed to fetch sender of {}: {}", self.chain, hash, e);
                None
            },
        }
    }
}
