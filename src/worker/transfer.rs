use std::sync::Arc;

use alloy::{primitives::Address, rpc::types::Log, sol_types::SolEvent};
use async_trait::async_trait;
use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::{
    abis::Transfer,
    rpc::LogQuery,
    utils::is_untracked,
    worker::{ChainContext, Reconciler, Watcher},
};

/// Every transfer of the token on one chain, feeding the reconciler.
///
/// Each counterparty is refreshed once per batch with a `balanceOf` read.
/// A failed refresh is logged and left for the stale refresh job; activity
/// writes are what hold the cycle.
pub struct TransferWatcher {
    ctx: Arc<ChainContext>,
    reconciler: Arc<Reconciler>,
}

impl TransferWatcher {
    pub fn new(ctx: Arc<ChainContext>, reconciler: Arc<Reconciler>) -> Self {
        Self { ctx, reconciler }
    }
}

#[async_trait]
impl Watcher for TransferWatcher {
    fn name(&self) -> &str {
        "transfers"
    }

    fn query(&self) -> LogQuery {
        LogQuery::new(self.ctx.token, Transfer::SIGNATURE_HASH)
    }

    async fn handle(&self, logs: &[Log]) -> anyhow::Result<()> {
        let chain = self.ctx.chain;
        let mut touched: Vec<Address> = Vec::new();
        let mut seen = FxHashSet::default();

        for log in logs {
            let event = match Transfer::decode_log_data(&log.inner.data) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        "[{}] Skipping undecodable transfer {:?}: {}",
                        chain, log.transaction_hash, e
                    );
                    continue;
                },
            };

            let at = self.ctx.block_time(log.block_number.unwrap_or_default()).await?;
            self.reconciler.record_activity(event.from, at, true).await?;
            self.reconciler.record_activity(event.to, at, false).await?;

            for party in [event.from, event.to] {
                if !is_untracked(&party) && seen.insert(party) {
                    touched.push(party);
                }
            }
        }

        for address in touched {
            if let Err(e) = self.reconciler.refresh(address, chain).await {
                warn!("[{}] Balance refresh for {} failed: {:#}", chain, address, e);
            }
        }

        if !logs.is_empty() {
            debug!("[{}] Processed {} transfers", chain, logs.len());
        }
        Ok(())
    }
}
