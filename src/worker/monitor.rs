//! Live per-chain polling loop.

use std::{sync::Arc, time::Duration};

use alloy::rpc::types::Log;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    db::models::Scope,
    rpc::{ErrorKind, RpcError},
    worker::{ChainContext, Watcher},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Watermark not loaded yet.
    Starting,
    Polling,
    /// Consecutive rate-limited cycles.
    Backoff { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// `[from, to]` was fetched for every watcher and dispatched.
    Advanced { from: u64, to: u64, head: u64 },
    /// Nothing new past the watermark.
    Idle { head: u64 },
    /// A provider refused the window; the next cycle uses `chunk_size`.
    RangeShrunk { chunk_size: u64 },
    RateLimited { delay: Duration },
    /// The cycle failed and will be retried unchanged.
    Held { reason: String },
}

/// Polls one chain and feeds its watchers.
///
/// Each cycle fetches `[watermark + 1, min(head, watermark + chunk_size)]`
/// for every watcher. Logs are dispatched only when every fetch succeeded,
/// and the watermark moves only when every watcher handled its logs, so a
/// window is either fully applied or retried as a whole.
pub struct ChainMonitor {
    ctx: Arc<ChainContext>,
    watchers: Vec<Arc<dyn Watcher>>,
    state: MonitorState,
    watermark: u64,
    chunk_size: u64,
    poll_interval: Duration,
    catch_up_pause: Duration,
}

impl ChainMonitor {
    pub fn new(
        ctx: Arc<ChainContext>,
        watchers: Vec<Arc<dyn Watcher>>,
        chunk_size: u64,
        poll_interval: Duration,
        catch_up_pause: Duration,
    ) -> Self {
        Self {
            ctx,
            watchers,
            state: MonitorState::Starting,
            watermark: 0,
            chunk_size: chunk_size.max(1),
            poll_interval,
            catch_up_pause,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Last block fully processed.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn scope(&self) -> Scope {
        Scope::Monitor(self.ctx.chain)
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        let chain = self.ctx.chain;
        self.watermark = match self.ctx.store.get_checkpoint(&self.scope()).await? {
            Some(block) => {
                info!("[{}] Resuming from checkpoint at block {}", chain, block);
                block
            },
            None => {
                let head = self.ctx.pool.head().await?;
                info!("[{}] No checkpoint, starting at head {}", chain, head);
                head
            },
        };
        self.state = MonitorState::Polling;
        Ok(())
    }

    /// Run one polling cycle. Any outcome other than a rate limit ends a
    /// backoff streak.
    pub async fn step(&mut self) -> anyhow::Result<CycleOutcome> {
        if self.state == MonitorState::Starting {
            self.start().await?;
        }

        let outcome = self.poll().await;
        if !matches!(outcome, Ok(CycleOutcome::RateLimited { .. })) {
            self.state = MonitorState::Polling;
        }
        outcome
    }

    async fn poll(&mut self) -> anyhow::Result<CycleOutcome> {
        let head = match self.ctx.pool.head().await {
            Ok(head) => head,
            Err(e) if e.kind() == ErrorKind::RateLimited => return Ok(self.back_off(&e)),
            Err(e) => return Err(e.into()),
        };
        if head <= self.watermark {
            return Ok(CycleOutcome::Idle { head });
        }

        let from = self.watermark + 1;
        let to = head.min(self.watermark.saturating_add(self.chunk_size));

        let queries: Vec<_> = self.watchers.iter().map(|w| w.query()).collect();
        let results = join_all(
            queries
                .iter()
                .map(|query| self.ctx.pool.fetch_logs(query, from, to)),
        )
        .await;

        let mut batches: Vec<Vec<Log>> = Vec::with_capacity(results.len());
        let mut errors: Vec<RpcError> = Vec::new();
        for result in results {
            match result {
                Ok(logs) => batches.push(logs),
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Ok(self.on_fetch_errors(errors, from, to));
        }

        for (watcher, logs) in self.watchers.iter().zip(&batches) {
            if let Err(e) = watcher.handle(logs).await {
                error!(
                    "[{}] {} failed on blocks {}-{}: {:#}",
                    self.ctx.chain,
                    watcher.name(),
                    from,
                    to,
                    e
                );
                return Ok(CycleOutcome::Held {
                    reason: format!("{}: {:#}", watcher.name(), e),
                });
            }
        }

        if let Err(e) = self.ctx.store.set_checkpoint(&self.scope(), to).await {
            warn!("[{}] Failed to persist watermark {}: {:#}", self.ctx.chain, to, e);
        }
        self.watermark = to;

        let total: usize = batches.iter().map(Vec::len).sum();
        debug!(
            "[{}] Processed blocks {}-{} ({} logs, head {})",
            self.ctx.chain, from, to, total, head
        );

        Ok(CycleOutcome::Advanced { from, to, head })
    }

    fn on_fetch_errors(&mut self, errors: Vec<RpcError>, from: u64, to: u64) -> CycleOutcome {
        let chain = self.ctx.chain;

        if errors.iter().any(|e| e.kind() == ErrorKind::RangeTooLarge) {
            let span = to - from + 1;
            self.chunk_size = (span / 2).max(1);
            warn!(
                "[{}] Range error on blocks {}-{}, chunk size now {}",
                chain, from, to, self.chunk_size
            );
            return CycleOutcome::RangeShrunk {
                chunk_size: self.chunk_size,
            };
        }

        if let Some(e) = errors.iter().find(|e| e.kind() == ErrorKind::RateLimited) {
            return self.back_off(e);
        }

        let reason = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("[{}] Fetch failed for blocks {}-{}: {}", chain, from, to, reason);
        CycleOutcome::Held { reason }
    }

    fn back_off(&mut self, err: &RpcError) -> CycleOutcome {
        let attempt = match self.state {
            MonitorState::Backoff { attempt } => attempt + 1,
            _ => 1,
        };
        self.state = MonitorState::Backoff { attempt };
        let delay = self.ctx.pool.policy().delay(attempt);
        warn!(
            "[{}] Rate limited ({}), backing off {:?} (attempt {})",
            self.ctx.chain, err, delay, attempt
        );
        CycleOutcome::RateLimited { delay }
    }

    /// Poll until `cancellation_token` fires. Failures are logged and the
    /// loop re-arms; nothing here ends the task early.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        let chain = self.ctx.chain;
        info!(
            "[{}] Monitor started with {} watcher(s)",
            chain,
            self.watchers.len()
        );

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.step().await {
                Ok(CycleOutcome::Advanced { to, head, .. }) if to < head => self.catch_up_pause,
                Ok(CycleOutcome::Advanced { .. }) | Ok(CycleOutcome::Idle { .. }) => {
                    self.poll_interval
                },
                Ok(CycleOutcome::RangeShrunk { .. }) => self.catch_up_pause,
                Ok(CycleOutcome::RateLimited { delay }) => delay,
                Ok(CycleOutcome::Held { .. }) => self.poll_interval,
                Err(e) => {
                    error!("[{}] Monitor cycle failed: {:#}", chain, e);
                    self.poll_interval
                },
            };

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("[{}] Monitor stopped at block {}", chain, self.watermark);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::ThresholdSettings,
        db::{models::ChainKey, LedgerStore},
        rpc::LogQuery,
        testing::{address_of, moon, test_chain, transfer_log, ScriptedRpc, TestChain},
        utils::BURN_ADDRESS,
        worker::{BurnWatcher, Reconciler, TransferWatcher},
    };

    fn monitor(chain: &TestChain, chunk_size: u64) -> ChainMonitor {
        let reconciler = Arc::new(Reconciler::new(chain.store.clone(), vec![chain.ctx.clone()]));
        let watchers: Vec<Arc<dyn Watcher>> = vec![
            Arc::new(BurnWatcher::new(
                chain.ctx.clone(),
                reconciler.clone(),
                ThresholdSettings::default(),
            )),
            Arc::new(TransferWatcher::new(chain.ctx.clone(), reconciler)),
        ];
        ChainMonitor::new(
            chain.ctx.clone(),
            watchers,
            chunk_size,
            Duration::ZERO,
            Duration::ZERO,
        )
    }

    fn burn_at(chain: &TestChain, block: u64, tx: u64) -> Log {
        transfer_log(chain.ctx.token, address_of(0xA), BURN_ADDRESS, moon(5), block, tx, 0)
    }

    #[tokio::test]
    async fn test_starts_at_head_and_advances() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(100);
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        rpc.add_logs(vec![burn_at(&chain, 90, 1), burn_at(&chain, 105, 2)]);
        let mut monitor = monitor(&chain, 10);

        assert_eq!(monitor.step().await.unwrap(), CycleOutcome::Idle { head: 100 });
        assert_eq!(monitor.watermark(), 100);

        rpc.set_head(130);
        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::Advanced {
                from: 101,
                to: 110,
                head: 130
            }
        );

        // Only the burn after the starting head is picked up.
        let burns = chain.store.burns().await;
        assert_eq!(burns.len(), 1);
        assert_eq!(burns[0].block_number, 105);
        assert_eq!(
            chain
                .store
                .get_checkpoint(&Scope::Monitor(ChainKey::Nova))
                .await
                .unwrap(),
            Some(110)
        );
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint() {
        let rpc = Arc::new(ScriptedRpc::new("one", 100));
        rpc.set_head(80);
        let chain = test_chain(ChainKey::One, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::One), 50)
            .await
            .unwrap();
        let mut monitor = monitor(&chain, 100);

        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::Advanced {
                from: 51,
                to: 80,
                head: 80
            }
        );
        assert_eq!(monitor.state(), MonitorState::Polling);
    }

    #[tokio::test]
    async fn test_range_errors_shrink_without_advancing() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(1000);
        rpc.set_effective_range(4);
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::Nova), 900)
            .await
            .unwrap();
        rpc.add_logs(vec![burn_at(&chain, 902, 1)]);
        let mut monitor = monitor(&chain, 10);

        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::RangeShrunk { chunk_size: 5 }
        );
        assert_eq!(monitor.watermark(), 900);
        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::RangeShrunk { chunk_size: 2 }
        );
        assert_eq!(monitor.watermark(), 900);
        assert!(chain.store.burns().await.is_empty());

        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::Advanced {
                from: 901,
                to: 902,
                head: 1000
            }
        );
        assert_eq!(chain.store.burns().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_then_recovers() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(20);
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::Nova), 10)
            .await
            .unwrap();
        let mut monitor = monitor(&chain, 100);

        rpc.fail_logs_next(RpcError::RateLimited("429".to_string()));
        assert!(matches!(
            monitor.step().await.unwrap(),
            CycleOutcome::RateLimited { .. }
        ));
        assert_eq!(monitor.state(), MonitorState::Backoff { attempt: 1 });

        rpc.fail_logs_next(RpcError::RateLimited("429".to_string()));
        monitor.step().await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Backoff { attempt: 2 });
        assert_eq!(monitor.watermark(), 10);

        assert!(matches!(
            monitor.step().await.unwrap(),
            CycleOutcome::Advanced { to: 20, .. }
        ));
        assert_eq!(monitor.state(), MonitorState::Polling);
    }

    #[tokio::test]
    async fn test_backoff_ends_on_any_other_outcome() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(20);
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::Nova), 10)
            .await
            .unwrap();
        let mut monitor = monitor(&chain, 100);

        rpc.fail_logs_next(RpcError::RateLimited("429".to_string()));
        monitor.step().await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Backoff { attempt: 1 });

        rpc.fail_logs_next(RpcError::Unknown("internal error".to_string()));
        assert!(matches!(
            monitor.step().await.unwrap(),
            CycleOutcome::Held { .. }
        ));
        assert_eq!(monitor.state(), MonitorState::Polling);
        assert_eq!(monitor.watermark(), 10);

        rpc.fail_logs_next(RpcError::RateLimited("429".to_string()));
        monitor.step().await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Backoff { attempt: 1 });

        rpc.set_head(10);
        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::Idle { head: 10 }
        );
        assert_eq!(monitor.state(), MonitorState::Polling);
    }

    #[tokio::test]
    async fn test_one_failed_fetch_blocks_all_dispatch() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(20);
        let chain = test_chain(ChainKey::Nova, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::Nova), 10)
            .await
            .unwrap();
        rpc.add_logs(vec![burn_at(&chain, 15, 1)]);
        let mut monitor = monitor(&chain, 100);

        rpc.fail_logs_next(RpcError::Unknown("internal error".to_string()));
        assert!(matches!(
            monitor.step().await.unwrap(),
            CycleOutcome::Held { .. }
        ));
        assert!(chain.store.burns().await.is_empty());
        assert!(chain.store.holders().await.is_empty());
        assert_eq!(monitor.watermark(), 10);

        monitor.step().await.unwrap();
        assert_eq!(chain.store.burns().await.len(), 1);
        assert_eq!(monitor.watermark(), 20);
    }

    struct FlakyWatcher {
        query: LogQuery,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Watcher for FlakyWatcher {
        fn name(&self) -> &str {
            "flaky"
        }

        fn query(&self) -> LogQuery {
            self.query.clone()
        }

        async fn handle(&self, _logs: &[Log]) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("database unavailable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_failure_replays_window() {
        let rpc = Arc::new(ScriptedRpc::new("eth", 100));
        rpc.set_head(40);
        let chain = test_chain(ChainKey::Eth, vec![rpc.clone()]);
        chain
            .store
            .set_checkpoint(&Scope::Monitor(ChainKey::Eth), 30)
            .await
            .unwrap();
        let flaky = Arc::new(FlakyWatcher {
            query: LogQuery::new(chain.ctx.token, alloy::primitives::B256::ZERO),
            failures: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        });
        let mut monitor = ChainMonitor::new(
            chain.ctx.clone(),
            vec![flaky.clone()],
            100,
            Duration::ZERO,
            Duration::ZERO,
        );

        assert!(matches!(
            monitor.step().await.unwrap(),
            CycleOutcome::Held { .. }
        ));
        assert_eq!(monitor.watermark(), 30);
        assert_eq!(
            monitor.step().await.unwrap(),
            CycleOutcome::Advanced {
                from: 31,
                to: 40,
                head: 40
            }
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let rpc = Arc::new(ScriptedRpc::new("nova", 100));
        rpc.set_head(5);
        let chain = test_chain(ChainKey::Nova, vec![rpc]);
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), monitor(&chain, 10).run(token))
            .await
            .unwrap();
    }
}
