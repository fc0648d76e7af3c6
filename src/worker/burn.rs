use std::sync::Arc;

use alloy::{rpc::types::Log, sol_types::SolEvent};
use anyhow::Context;
use async_trait::async_trait;
use log::{info, warn};

use crate::{
    abis::Transfer,
    config::ThresholdSettings,
    db::models::{Burn, Scope},
    notify::message::{burn_message, resolve_address},
    rpc::LogQuery,
    utils::{format_address, hex_encode, u256_to_f64, BURN_ADDRESS, MOON_DECIMALS},
    worker::{ChainContext, Reconciler, Watcher},
};

/// Transfers of the token into the burn address.
pub struct BurnWatcher {
    ctx: Arc<ChainContext>,
    reconciler: Arc<Reconciler>,
    thresholds: ThresholdSettings,
    notify: bool,
}

impl BurnWatcher {
    pub fn new(
        ctx: Arc<ChainContext>,
        reconciler: Arc<Reconciler>,
        thresholds: ThresholdSettings,
    ) -> Self {
        Self {
            ctx,
            reconciler,
            thresholds,
            notify: true,
        }
    }

    /// Persist only. Backfills replay history and must not alert.
    pub fn without_notifications(mut self) -> Self {
        self.notify = false;
        self
    }

    pub fn scope(&self) -> Scope {
        Scope::Burns(self.ctx.chain)
    }

    async fn process(&self, log: &Log, event: Transfer) -> anyhow::Result<()> {
        let chain = self.ctx.chain;
        let amount = u256_to_f64(event.value, MOON_DECIMALS);

        let persist = amount >= self.thresholds.persist_min_amount;
        let notify = self.notify && amount >= self.thresholds.notify_min_amount;
        if !persist && !notify {
            return Ok(());
        }

        let Some(tx_hash) = log.transaction_hash else {
            warn!("[{}] Burn log without transaction hash, skipping", chain);
            return Ok(());
        };
        let block_number = log.block_number.unwrap_or_default();
        let timestamp = self.ctx.block_time(block_number).await?;

        let burn = Burn {
            tx_hash: hex_encode(tx_hash.as_slice()),
            chain,
            sender: format_address(&event.from),
            amount,
            block_number,
            timestamp,
        };

        info!(
            "[{}] Burn of {:.2} MOON from {} in block {}",
            chain, amount, burn.sender, block_number
        );

        if persist {
            self.ctx
                .store
                .upsert_burn(&burn)
                .await
                .with_context(|| format!("Failed to save burn {}", burn.tx_hash))?;
            self.reconciler
                .record_activity(event.from, timestamp, true)
                .await?;
        }

        if notify {
            let holder = match self.ctx.store.get_holder(&burn.sender).await {
                Ok(holder) => holder,
                Err(e) => {
                    warn!("[{}] Failed to look up {}: {:#}", chain, burn.sender, e);
                    None
                },
            };
            let sender = resolve_address(&burn.sender, holder.as_ref());
            self.ctx
                .notifier
                .send(&burn_message(&burn, &sender, &self.ctx.explorer_url))
                .await;
        }

        Ok(())
    }
}

#[async_trait]
impl Watcher for BurnWatcher {
    fn name(&self) -> &str {
        "burns"
    }

    fn query(&self) -> LogQuery {
        LogQuery::new(self.ctx.token, Transfer::SIGNATURE_HASH)
            .with_topic2(vec![BURN_ADDRESS.into_word()])
    }

    async fn handle(&self, logs: &[Log]) -> anyhow::Result<()> {
        for log in logs {
            match Transfer::decode_log_data(&log.inner.data) {
                Ok(event) => self.process(log, event).await?,
                Err(e) => warn!(
                    "[{}] Skipping undecodable burn log {:?}: {}",
                    self.ctx.chain, log.transaction_hash, e
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;

    use super::*;
    use crate::{
        db::{
            models::{ChainKey, Holder},
            LedgerStore,
        },
        rpc::RpcError,
        testing::{address_of, moon, test_chain, transfer_log, ScriptedRpc, TestChain},
    };

    fn watcher(chain: &TestChain) -> BurnWatcher {
        let reconciler = Arc::new(Reconciler::new(chain.store.clone(), vec![chain.ctx.clone()]));
        BurnWatcher::new(chain.ctx.clone(), reconciler, ThresholdSettings::default())
    }

    #[tokio::test]
    async fn test_burn_is_recorded_and_announced() {
        let chain = test_chain(ChainKey::Nova, vec![Arc::new(ScriptedRpc::new("nova", 5))]);
        let burner = address_of(0xA);
        let log = transfer_log(chain.ctx.token, burner, BURN_ADDRESS, moon(500), 42, 1, 0);
        let burns = watcher(&chain);

        assert!(burns.query().matches(&log));
        burns.handle(&[log]).await.unwrap();

        let stored = chain.store.burns().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].amount, 500.0);
        assert_eq!(stored[0].chain, ChainKey::Nova);
        assert_eq!(stored[0].chain.display_name(), "Arbitrum Nova");
        assert_eq!(stored[0].sender, format_address(&burner));
        assert_eq!(stored[0].block_number, 42);
        assert_eq!(stored[0].timestamp.timestamp(), 1_700_000_000 + 42 * 12);

        let messages = chain.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("*500 MOONs*"));
        assert!(messages[0].contains("https://nova.arbiscan.io/tx/"));

        let holder = chain.store.get_holder(&stored[0].sender).await.unwrap().unwrap();
        assert!(holder.has_outgoing);
    }

    #[tokio::test]
    async fn test_redelivery_keeps_one_record() {
        let chain = test_chain(ChainKey::Nova, vec![Arc::new(ScriptedRpc::new("nova", 5))]);
        let log = transfer_log(chain.ctx.token, address_of(1), BURN_ADDRESS, moon(10), 7, 3, 0);
        let burns = watcher(&chain).without_notifications();

        burns.handle(&[log.clone()]).await.unwrap();
        burns.handle(&[log]).await.unwrap();

        assert_eq!(chain.store.burns().await.len(), 1);
        assert!(chain.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_small_burns_are_stored_silently() {
        let chain = test_chain(ChainKey::One, vec![Arc::new(ScriptedRpc::new("one", 100))]);
        let dust = U256::from(200_000_000_000_000_000u64);
        let log = transfer_log(chain.ctx.token, address_of(2), BURN_ADDRESS, dust, 9, 4, 0);

        watcher(&chain).handle(&[log]).await.unwrap();

        let stored = chain.store.burns().await;
        assert_eq!(stored.len(), 1);
        assert!((stored[0].amount - 0.2).abs() < 1e-12);
        assert!(chain.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_alert_names_linked_user() {
        let chain = test_chain(ChainKey::Nova, vec![Arc::new(ScriptedRpc::new("nova", 5))]);
        let burner = address_of(0xB);
        let mut holder = Holder::new(&format_address(&burner));
        holder.username = Some("moonboy".to_string());
        chain.store.put_holder(holder).await;

        let log = transfer_log(chain.ctx.token, burner, BURN_ADDRESS, moon(1), 1, 1, 0);
        watcher(&chain).handle(&[log]).await.unwrap();

        assert!(chain.notifier.messages()[0].contains("From: u/moonboy"));
    }

    #[tokio::test]
    async fn test_unknown_block_time_holds_the_batch() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 5));
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        let burner = address_of(0xC);
        let log = transfer_log(chain.ctx.token, burner, BURN_ADDRESS, moon(5), 11, 1, 0);
        rpc.fail_always(RpcError::Unknown("header not found".to_string()));

        assert!(watcher(&chain).handle(&[log.clone()]).await.is_err());
        assert!(chain.store.burns().await.is_empty());
        assert!(chain.store.get_holder(&format_address(&burner)).await.unwrap().is_none());
        assert!(chain.notifier.messages().is_empty());

        rpc.recover();
        watcher(&chain).handle(&[log]).await.unwrap();
        let stored = chain.store.burns().await;
        assert_eq!(stored[0].timestamp.timestamp(), 1_700_000_000 + 11 * 12);
    }

    #[tokio::test]
    async fn test_query_ignores_other_transfers() {
        let chain = test_chain(ChainKey::Nova, vec![Arc::new(ScriptedRpc::new("nova", 5))]);
        let log = transfer_log(chain.ctx.token, address_of(1), address_of(2), moon(1), 1, 1, 0);
        assert!(!watcher(&chain).query().matches(&log));
    }
}
