use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::{
    db::{
        models::{ChainKey, Holder},
        LedgerStore,
    },
    utils::{format_address, is_untracked, u256_to_f64, MOON_DECIMALS},
    worker::ChainContext,
};

/// Keeps holder rows in line with the chain.
///
/// Balances are never derived from transfer amounts: every refresh reads
/// `balanceOf` and overwrites that chain's column, so replays, gaps and
/// out-of-order delivery all converge on the on-chain value. It is also the
/// only writer of the activity fields.
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    chains: FxHashMap<ChainKey, Arc<ChainContext>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, contexts: Vec<Arc<ChainContext>>) -> Self {
        Self {
            store,
            chains: contexts.into_iter().map(|ctx| (ctx.chain, ctx)).collect(),
        }
    }

    pub fn chains(&self) -> Vec<ChainKey> {
        let mut keys: Vec<ChainKey> = self.chains.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Read the balance of `address` on `chain` and store it. Returns the
    /// holder with its recomputed total, `None` for untracked addresses.
    pub async fn refresh(&self, address: Address, chain: ChainKey) -> anyhow::Result<Option<Holder>> {
        if is_untracked(&address) {
            return Ok(None);
        }
        let Some(ctx) = self.chains.get(&chain) else {
            bail!("Chain {} is not configured", chain);
        };

        let raw = ctx
            .pool
            .balance_of(ctx.token, address)
            .await
            .with_context(|| format!("[{}] balanceOf({}) failed", chain, address))?;
        let balance = u256_to_f64(raw, MOON_DECIMALS);

        let holder = self
            .store
            .set_chain_balance(&format_address(&address), chain, balance)
            .await?;
        debug!(
            "[{}] {} balance {} (total {})",
            chain, holder.address, balance, holder.total_balance
        );

        Ok(Some(holder))
    }

    /// Refresh `address` on every configured chain concurrently.
    ///
    /// Chains that fail keep their previous value. Errors only when no chain
    /// could be refreshed.
    pub async fn refresh_all(&self, address: Address) -> anyhow::Result<Option<Holder>> {
        if is_untracked(&address) {
            return Ok(None);
        }

        let chains = self.chains();
        let results = join_all(chains.iter().map(|chain| self.refresh(address, *chain))).await;

        let mut refreshed = 0;
        let mut last_err = None;
        for (chain, result) in chains.iter().zip(results) {
            match result {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!("[{}] Failed to refresh {}: {:#}", chain, address, e);
                    last_err = Some(e);
                },
            }
        }

        if refreshed == 0 {
            if let Some(e) = last_err {
                return Err(e.context(format!("No chain refreshed for {}", address)));
            }
        }

        self.store.get_holder(&format_address(&address)).await
    }

    /// Note a transfer involving `address` at `at`.
    pub async fn record_activity(
        &self,
        address: Address,
        at: DateTime<Utc>,
        outgoing: bool,
    ) -> anyhow::Result<()> {
        if is_untracked(&address) {
            return Ok(());
        }
        self.store
            .record_activity(&format_address(&address), at, outgoing)
            .await
    }
}
