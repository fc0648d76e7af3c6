use std::sync::Arc;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::{
    abis::{V2Swap, V3Swap, V4Swap},
    config::{DexVersion, ThresholdSettings},
    db::models::{Scope, Swap, SwapAction},
    notify::message::{resolve_address, swap_message},
    rpc::LogQuery,
    utils::{format_address, hex_encode, signed_parts, signed_parts_i128, u256_to_f64},
    worker::{pools::DexPool, ChainContext, Reconciler, Watcher},
};

/// A swap reduced to its MOON leg: direction plus raw volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub action: SwapAction,
    pub moon: U256,
    pub quote: U256,
}

/// V2 pairs report unsigned in/out amounts per leg. Valid data has exactly
/// one of in/out set on the MOON leg: in means the user sold MOON.
pub fn classify_v2(moon_leg: usize, amounts_in: [U256; 2], amounts_out: [U256; 2]) -> Option<Trade> {
    let quote_leg = 1 - moon_leg;
    let moon_in = amounts_in[moon_leg];
    let moon_out = amounts_out[moon_leg];

    let action = match (moon_in.is_zero(), moon_out.is_zero()) {
        (false, true) => SwapAction::Sold,
        (true, false) => SwapAction::Bought,
        _ => return None,
    };

    Some(Trade {
        action,
        moon: moon_in + moon_out,
        quote: amounts_in[quote_leg] + amounts_out[quote_leg],
    })
}

/// V3 pools and the V4 manager report signed pool deltas as
/// `(negative, magnitude)`. Positive means the pool received the leg, so
/// the user sold it; negative means the pool paid it out.
pub fn classify_signed(moon_leg: usize, amounts: [(bool, U256); 2]) -> Option<Trade> {
    let (moon_negative, moon) = amounts[moon_leg];
    if moon.is_zero() {
        return None;
    }

    Some(Trade {
        action: if moon_negative {
            SwapAction::Bought
        } else {
            SwapAction::Sold
        },
        moon,
        quote: amounts[1 - moon_leg].1,
    })
}

enum RawSwap {
    Unsigned {
        sender: Address,
        amounts_in: [U256; 2],
        amounts_out: [U256; 2],
    },
    Signed {
        pool_id: Option<B256>,
        sender: Address,
        amounts: [(bool, U256); 2],
    },
}

/// Swaps on one DEX pool (or V4 manager).
pub struct SwapWatcher {
    ctx: Arc<ChainContext>,
    reconciler: Arc<Reconciler>,
    pool: DexPool,
    thresholds: ThresholdSettings,
    notify: bool,
}

impl SwapWatcher {
    pub fn new(
        ctx: Arc<ChainContext>,
        reconciler: Arc<Reconciler>,
        pool: DexPool,
        thresholds: ThresholdSettings,
    ) -> Self {
        Self {
            ctx,
            reconciler,
            pool,
            thresholds,
            notify: true,
        }
    }

    pub fn without_notifications(mut self) -> Self {
        self.notify = false;
        self
    }

    pub fn pool(&self) -> &DexPool {
        &self.pool
    }

    pub fn scope(&self) -> Scope {
        Scope::Swaps {
            chain: self.ctx.chain,
            dex: self.pool.dex.clone(),
        }
    }

    fn decode(&self, log: &Log) -> Result<RawSwap, alloy::sol_types::Error> {
        let data = &log.inner.data;
        Ok(match self.pool.version {
            DexVersion::V2 => {
                let event = V2Swap::decode_log_data(data)?;
                RawSwap::Unsigned {
                    sender: event.sender,
                    amounts_in: [event.amount0In, event.amount1In],
                    amounts_out: [event.amount0Out, event.amount1Out],
                }
            },
            DexVersion::V3 => {
                let event = V3Swap::decode_log_data(data)?;
                RawSwap::Signed {
                    pool_id: None,
                    sender: event.sender,
                    amounts: [signed_parts(event.amount0), signed_parts(event.amount1)],
                }
            },
            DexVersion::V4 => {
                let event = V4Swap::decode_log_data(data)?;
                RawSwap::Signed {
                    pool_id: Some(event.id),
                    sender: event.sender,
                    amounts: [
                        signed_parts_i128(event.amount0),
                        signed_parts_i128(event.amount1),
                    ],
                }
            },
        })
    }

    async fn process(&self, log: &Log, raw: RawSwap) -> anyhow::Result<()> {
        let chain = self.ctx.chain;
        let pool_id = match &raw {
            RawSwap::Unsigned { .. } => None,
            RawSwap::Signed { pool_id, .. } => *pool_id,
        };

        let Some(pair) = self.pool.pair_for(pool_id) else {
            debug!("[{}] {}: ignoring unknown pool {:?}", chain, self.pool.dex, pool_id);
            return Ok(());
        };
        let Some(moon_leg) = pair.moon_index() else {
            warn!("[{}] {} has no MOON leg", chain, self.pool.dex);
            return Ok(());
        };

        let (trade, event_sender) = match raw {
            RawSwap::Unsigned {
                sender,
                amounts_in,
                amounts_out,
            } => (classify_v2(moon_leg, amounts_in, amounts_out), sender),
            RawSwap::Signed {
                sender, amounts, ..
            } => (classify_signed(moon_leg, amounts), sender),
        };
        let Some(trade) = trade else {
            debug!("[{}] {}: swap without MOON movement, skipping", chain, self.pool.dex);
            return Ok(());
        };

        let moon_token = pair.leg(moon_leg);
        let quote_token = pair.leg(1 - moon_leg);
        let moon_amount = u256_to_f64(trade.moon, moon_token.decimals);
        let quote_amount = u256_to_f64(trade.quote, quote_token.decimals);

        let persist = moon_amount >= self.thresholds.persist_min_amount;
        let notify = self.notify && moon_amount >= self.thresholds.notify_min_amount;
        if !persist && !notify {
            return Ok(());
        }

        let Some(tx_hash) = log.transaction_hash else {
            warn!("[{}] Swap log without transaction hash, skipping", chain);
            return Ok(());
        };
        let block_number = log.block_number.unwrap_or_default();
        let timestamp = self.ctx.block_time(block_number).await?;
        let maker = self.ctx.tx_sender(tx_hash).await.unwrap_or(event_sender);

        let (token_in, amount_in, token_out, amount_out) = match trade.action {
            SwapAction::Sold => (moon_token, moon_amount, quote_token, quote_amount),
            SwapAction::Bought => (quote_token, quote_amount, moon_token, moon_amount),
        };
        let swap = Swap {
            tx_hash: hex_encode(tx_hash.as_slice()),
            chain,
            dex: self.pool.dex.clone(),
            action: trade.action,
            token_in: token_in.symbol.clone(),
            amount_in,
            token_out: token_out.symbol.clone(),
            amount_out,
            maker: format_address(&maker),
            block_number,
            timestamp,
        };

        info!(
            "[{}] {} {} {:.2} MOON @ {:.6} {}",
            chain,
            self.pool.dex,
            swap.action,
            moon_amount,
            swap.price(),
            quote_token.symbol
        );

        if persist {
            self.ctx
                .store
                .upsert_swap(&swap)
                .await
                .with_context(|| format!("Failed to save swap {}", swap.tx_hash))?;
            self.reconciler
                .record_activity(maker, timestamp, false)
                .await?;
        }

        if notify {
            let holder = match self.ctx.store.get_holder(&swap.maker).await {
                Ok(holder) => holder,
                Err(e) => {
                    warn!("[{}] Failed to look up {}: {:#}", chain, swap.maker, e);
                    None
                },
            };
            let maker = resolve_address(&swap.maker, holder.as_ref());
            self.ctx
                .notifier
                .send(&swap_message(&swap, &maker, &self.ctx.explorer_url))
                .await;
        }

        Ok(())
    }
}

#[async_trait]
impl Watcher for SwapWatcher {
    fn name(&self) -> &str {
        &self.pool.dex
    }

    fn query(&self) -> LogQuery {
        let event = match self.pool.version {
            DexVersion::V2 => V2Swap::SIGNATURE_HASH,
            DexVersion::V3 => V3Swap::SIGNATURE_HASH,
            DexVersion::V4 => V4Swap::SIGNATURE_HASH,
        };
        LogQuery::new(self.pool.address, event).with_topic1(self.pool.pool_ids())
    }

    async fn handle(&self, logs: &[Log]) -> anyhow::Result<()> {
        for log in logs {
            match self.decode(log) {
                Ok(raw) => self.process(log, raw).await?,
                Err(e) => warn!(
                    "[{}] Skipping undecodable {} swap {:?}: {}",
                    self.ctx.chain, self.pool.dex, log.transaction_hash, e
                ),
            }
        }
        Ok(())
    }
}
