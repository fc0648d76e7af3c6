use std::sync::Arc;

use alloy::{primitives::Address, rpc::types::Log, sol_types::SolEvent};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, warn};

use crate::{
    abis::Transfer,
    db::{
        models::{ChainKey, Distribution, EarnedTotal, Scope},
        LedgerStore,
    },
    rpc::LogQuery,
    utils::{format_address, hex_encode, u256_to_f64, MOON_DECIMALS},
    worker::{ChainContext, Watcher},
};

/// Outbound transfers from one distributor address.
///
/// Transfers back into any known distributor are internal movements and
/// are not counted as earnings.
pub struct DistributionWatcher {
    ctx: Arc<ChainContext>,
    distributor: Address,
    distributors: Vec<Address>,
    name: String,
}

impl DistributionWatcher {
    pub fn new(ctx: Arc<ChainContext>, distributor: Address, distributors: Vec<Address>) -> Self {
        Self {
            ctx,
            distributor,
            distributors,
            name: format!("distributor {}", format_address(&distributor)),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::Distributor {
            chain: self.ctx.chain,
            distributor: format_address(&self.distributor),
        }
    }

    async fn process(&self, log: &Log, event: Transfer) -> anyhow::Result<()> {
        let chain = self.ctx.chain;
        if self.distributors.contains(&event.to) {
            return Ok(());
        }
        let (Some(tx_hash), Some(log_index)) = (log.transaction_hash, log.log_index) else {
            warn!("[{}] Distribution log without position, skipping", chain);
            return Ok(());
        };

        let block_number = log.block_number.unwrap_or_default();
        let distribution = Distribution {
            tx_hash: hex_encode(tx_hash.as_slice()),
            log_index,
            chain,
            distributor: format_address(&event.from),
            recipient: format_address(&event.to),
            amount: u256_to_f64(event.value, MOON_DECIMALS),
            block_number,
            timestamp: self.ctx.block_time(block_number).await?,
        };

        self.ctx
            .store
            .upsert_distribution(&distribution)
            .await
            .with_context(|| {
                format!(
                    "Failed to save distribution {}#{}",
                    distribution.tx_hash, distribution.log_index
                )
            })
    }
}

#[async_trait]
impl Watcher for DistributionWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self) -> LogQuery {
        LogQuery::new(self.ctx.token, Transfer::SIGNATURE_HASH)
            .with_topic1(vec![self.distributor.into_word()])
    }

    async fn handle(&self, logs: &[Log]) -> anyhow::Result<()> {
        for log in logs {
            match Transfer::decode_log_data(&log.inner.data) {
                Ok(event) => self.process(log, event).await?,
                Err(e) => warn!(
                    "[{}] Skipping undecodable distribution {:?}: {}",
                    self.ctx.chain, log.transaction_hash, e
                ),
            }
        }
        if !logs.is_empty() {
            debug!("[{}] {}: {} transfers", self.ctx.chain, self.name, logs.len());
        }
        Ok(())
    }
}

/// Recipients ranked by total MOON received from distributors, optionally
/// limited to one chain and the first `limit` entries.
pub async fn top_earners(
    store: &dyn LedgerStore,
    chain: Option<ChainKey>,
    limit: Option<usize>,
) -> anyhow::Result<Vec<EarnedTotal>> {
    let mut totals = store
        .earned_totals(chain)
        .await
        .context("Failed to sum distributions")?;
    if let Some(limit) = limit {
        totals.truncate(limit);
    }
    Ok(totals)
}
