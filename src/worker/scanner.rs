//! Chunked historical log scanning.
//!
//! A [`ScanCursor`] walks `[from, to]` one provider-sized window at a time.
//! Windows are contiguous and never overlap. A range error halves the
//! window and retries the same start block, so no block is ever skipped
//! because a provider refused it.

use alloy::rpc::types::Log;
use log::{debug, warn};
use thiserror::Error;

use crate::rpc::{provider::sort_logs, ErrorKind, LogQuery, ProviderPool, RpcError};

/// What to do with a window that fails with a non-retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownErrorPolicy {
    /// Log the window and move past it (backfill).
    Skip,
    /// Stop and surface the error without advancing (live monitor).
    Hold,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Every provider gave up on the window. The cursor did not advance
    /// and will start over with the first provider.
    #[error("all providers exhausted for blocks {from}-{to}: {source}")]
    Exhausted {
        from: u64,
        to: u64,
        #[source]
        source: RpcError,
    },
    #[error("unrecoverable error for blocks {from}-{to}: {source}")]
    Held {
        from: u64,
        to: u64,
        #[source]
        source: RpcError,
    },
}

/// One fetched window.
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub from: u64,
    pub to: u64,
    pub logs: Vec<Log>,
    /// The window was skipped after a non-retryable error.
    pub skipped: bool,
}

/// Lazy, finite sequence of [`LogBatch`]es covering a block span.
pub struct ScanCursor<'a> {
    pool: &'a ProviderPool,
    query: &'a LogQuery,
    next: u64,
    end: u64,
    chunk_size: u64,
    provider_idx: usize,
    on_unknown: UnknownErrorPolicy,
}

impl<'a> ScanCursor<'a> {
    pub fn new(
        pool: &'a ProviderPool,
        query: &'a LogQuery,
        from_block: u64,
        to_block: u64,
        on_unknown: UnknownErrorPolicy,
    ) -> Self {
        Self {
            pool,
            query,
            next: from_block,
            end: to_block,
            chunk_size: pool.max_block_range().max(1),
            provider_idx: 0,
            on_unknown,
        }
    }

    /// Start from an already shrunk window size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.clamp(1, self.pool.max_block_range().max(1));
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// First block not yet delivered.
    pub fn next_block(&self) -> u64 {
        self.next
    }

    pub fn is_done(&self) -> bool {
        self.next > self.end
    }

    /// Fetch the next window, `Ok(None)` once the span is covered.
    pub async fn next_batch(&mut self) -> Result<Option<LogBatch>, ScanError> {
        if self.is_done() {
            return Ok(None);
        }

        let pool = self.pool;
        let policy = pool.policy().clone();
        let chain = pool.chain();
        let mut rate_limited = 0;
        let mut transient = 0;
        let mut last_error: Option<RpcError> = None;

        loop {
            let Some(provider) = pool.providers().get(self.provider_idx) else {
                self.provider_idx = 0;
                let to = self.window_end(self.chunk_size);
                return Err(ScanError::Exhausted {
                    from: self.next,
                    to,
                    source: last_error
                        .unwrap_or_else(|| RpcError::Unknown("no providers".to_string())),
                });
            };

            let size = self.chunk_size.min(provider.max_block_range()).max(1);
            let from = self.next;
            let to = self.window_end(size);

            match provider.get_logs(self.query, from, to).await {
                Ok(mut logs) => {
                    sort_logs(&mut logs);
                    debug!(
                        "[{}] {} returned {} logs for {}-{}",
                        chain,
                        provider.name(),
                        logs.len(),
                        from,
                        to
                    );
                    self.next = to + 1;
                    return Ok(Some(LogBatch {
                        from,
                        to,
                        logs,
                        skipped: false,
                    }));
                },
                Err(e) => match e.kind() {
                    ErrorKind::RangeTooLarge => {
                        let span = to - from + 1;
                        if span <= 1 {
                            warn!(
                                "[{}] {} refuses even single-block queries, trying next provider",
                                chain,
                                provider.name()
                            );
                            last_error = Some(e);
                            self.next_provider(&mut rate_limited, &mut transient);
                            continue;
                        }
                        self.chunk_size = span / 2;
                        warn!(
                            "[{}] {} rejected {}-{} ({}), shrinking window to {} blocks",
                            chain,
                            provider.name(),
                            from,
                            to,
                            e,
                            self.chunk_size
                        );
                    },
                    ErrorKind::RateLimited => {
                        rate_limited += 1;
                        if rate_limited > policy.rate_limit_attempts {
                            warn!(
                                "[{}] {} still rate limited after {} retries, trying next provider",
                                chain,
                                provider.name(),
                                policy.rate_limit_attempts
                            );
                            last_error = Some(e);
                            self.next_provider(&mut rate_limited, &mut transient);
                            continue;
                        }
                        let delay = policy.delay(rate_limited);
                        warn!(
                            "[{}] {} rate limited on {}-{}, pausing {:?}",
                            chain,
                            provider.name(),
                            from,
                            to,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    },
                    ErrorKind::Transient => {
                        transient += 1;
                        if transient > policy.transient_attempts {
                            last_error = Some(e);
                            self.next_provider(&mut rate_limited, &mut transient);
                            continue;
                        }
                        let delay = policy.delay(transient);
                        warn!(
                            "[{}] {} failed on {}-{} ({}), retry {}/{} in {:?}",
                            chain,
                            provider.name(),
                            from,
                            to,
                            e,
                            transient,
                            policy.transient_attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    },
                    ErrorKind::Unknown => match self.on_unknown {
                        UnknownErrorPolicy::Skip => {
                            warn!(
                                "[{}] Skipping blocks {}-{} after unrecoverable error: {}",
                                chain, from, to, e
                            );
                            self.next = to + 1;
                            return Ok(Some(LogBatch {
                                from,
                                to,
                                logs: Vec::new(),
                                skipped: true,
                            }));
                        },
                        UnknownErrorPolicy::Hold => {
                            return Err(ScanError::Held {
                                from,
                                to,
                                source: e,
                            });
                        },
                    },
                },
            }
        }
    }

    fn window_end(&self, size: u64) -> u64 {
        self.next.saturating_add(size - 1).min(self.end)
    }

    fn next_provider(&mut self, rate_limited: &mut u32, transient: &mut u32) {
        self.provider_idx += 1;
        *rate_limited = 0;
        *transient = 0;
    }
}

/// Fetch every log in `[from_block, to_block]`, in order.
pub async fn scan(
    pool: &ProviderPool,
    query: &LogQuery,
    from_block: u64,
    to_block: u64,
    on_unknown: UnknownErrorPolicy,
) -> Result<Vec<Log>, ScanError> {
    let mut cursor = ScanCursor::new(pool, query, from_block, to_block, on_unknown);
    let mut logs = Vec::new();
    while let Some(batch) = cursor.next_batch().await? {
        logs.extend(batch.logs);
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::{primitives::U256, sol_types::SolEvent};

    use super::*;
    use crate::db::models::ChainKey;
    use crate::rpc::{ChainRpc, RetryPolicy};
    use crate::testing::{address_of, hash_of, transfer_log, ScriptedRpc};

    fn pool_of(providers: Vec<Arc<ScriptedRpc>>) -> ProviderPool {
        ProviderPool::new(
            ChainKey::Nova,
            providers.into_iter().map(|p| p as Arc<dyn ChainRpc>).collect(),
            RetryPolicy::immediate(),
        )
    }

    fn assert_exact_cover(ranges: &[(u64, u64)], from: u64, to: u64) {
        let mut expected = from;
        for &(start, end) in ranges {
            assert_eq!(start, expected, "gap or overlap at {}", start);
            assert!(end >= start);
            expected = end + 1;
        }
        assert_eq!(expected, to + 1);
    }

    #[tokio::test]
    async fn test_span_is_covered_exactly_in_provider_sized_chunks() {
        let rpc = Arc::new(ScriptedRpc::new("alchemy", 100));
        let pool = pool_of(vec![rpc.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        for (k, r) in [(1u64, 100u64), (7, 100), (3, 100)] {
            rpc.clear_fetches();
            let from = 1_000;
            let to = from + k * r - 1;
            scan(&pool, &query, from, to, UnknownErrorPolicy::Hold)
                .await
                .unwrap();

            let fetched = rpc.fetched_ranges();
            assert_eq!(fetched.len() as u64, k);
            assert_exact_cover(&fetched, from, to);
        }
    }

    #[tokio::test]
    async fn test_range_errors_halve_until_accepted() {
        // Declares 2000 blocks but really serves about 10.
        let rpc = Arc::new(ScriptedRpc::new("nova-public", 2_000));
        rpc.set_effective_range(10);
        let pool = pool_of(vec![rpc.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        let mut cursor = ScanCursor::new(&pool, &query, 1, 2_000, UnknownErrorPolicy::Hold);
        let first = cursor.next_batch().await.unwrap().unwrap();

        // 2000 -> 1000 -> 500 -> 250 -> 125 -> 62 -> 31 -> 15 -> 7
        assert_eq!((first.from, first.to), (1, 7));
        assert_eq!(cursor.chunk_size(), 7);

        while cursor.next_batch().await.unwrap().is_some() {}
        assert!(cursor.is_done());
        assert_exact_cover(&rpc.fetched_ranges(), 1, 2_000);
        assert!(rpc.fetched_ranges().iter().all(|(s, e)| e - s + 1 <= 7));
    }

    #[tokio::test]
    async fn test_returns_logs_in_block_order() {
        let token = address_of(1);
        let rpc = Arc::new(ScriptedRpc::new("alchemy", 10));
        rpc.add_logs(vec![
            transfer_log(token, address_of(2), address_of(3), U256::from(1), 25, 1, 0),
            transfer_log(token, address_of(2), address_of(3), U256::from(2), 3, 2, 0),
            transfer_log(token, address_of(2), address_of(3), U256::from(3), 12, 3, 1),
            transfer_log(token, address_of(2), address_of(3), U256::from(4), 12, 3, 0),
        ]);
        let pool = pool_of(vec![rpc]);
        let query = LogQuery::new(token, crate::abis::Transfer::SIGNATURE_HASH);

        let logs = scan(&pool, &query, 1, 30, UnknownErrorPolicy::Hold).await.unwrap();
        let order: Vec<(u64, u64)> = logs
            .iter()
            .map(|l| (l.block_number.unwrap(), l.log_index.unwrap()))
            .collect();
        assert_eq!(order, vec![(3, 0), (12, 0), (12, 1), (25, 0)]);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_identical_request() {
        let rpc = Arc::new(ScriptedRpc::new("alchemy", 50));
        rpc.fail_next(RpcError::RateLimited("429".to_string()));
        rpc.fail_next(RpcError::RateLimited("429".to_string()));
        let pool = pool_of(vec![rpc.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        let mut cursor = ScanCursor::new(&pool, &query, 100, 199, UnknownErrorPolicy::Hold);
        let batch = cursor.next_batch().await.unwrap().unwrap();

        assert_eq!((batch.from, batch.to), (100, 149));
        assert_eq!(rpc.attempted_ranges(), vec![(100, 149); 3]);
    }

    #[tokio::test]
    async fn test_exhausted_providers_do_not_advance() {
        let first = Arc::new(ScriptedRpc::new("first", 20));
        let second = Arc::new(ScriptedRpc::new("second", 20));
        first.fail_always(RpcError::Transient("reset".to_string()));
        second.fail_always(RpcError::RateLimited("429".to_string()));
        let pool = pool_of(vec![first.clone(), second.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        let mut cursor = ScanCursor::new(&pool, &query, 1, 100, UnknownErrorPolicy::Skip);
        let err = cursor.next_batch().await.unwrap_err();

        assert!(matches!(err, ScanError::Exhausted { from: 1, .. }));
        assert_eq!(cursor.next_block(), 1);

        // Providers recover: the same window is fetched from the first provider.
        first.recover();
        second.recover();
        let batch = cursor.next_batch().await.unwrap().unwrap();
        assert_eq!((batch.from, batch.to), (1, 20));
        assert_eq!(first.fetched_ranges(), vec![(1, 20)]);
    }

    #[tokio::test]
    async fn test_unknown_error_policies() {
        let rpc = Arc::new(ScriptedRpc::new("alchemy", 10));
        let pool = pool_of(vec![rpc.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        rpc.fail_next(RpcError::Unknown("bad filter".to_string()));
        let mut held = ScanCursor::new(&pool, &query, 1, 30, UnknownErrorPolicy::Hold);
        assert!(matches!(
            held.next_batch().await,
            Err(ScanError::Held { from: 1, to: 10, .. })
        ));
        assert_eq!(held.next_block(), 1);

        rpc.fail_next(RpcError::Unknown("bad filter".to_string()));
        let mut skipping = ScanCursor::new(&pool, &query, 1, 30, UnknownErrorPolicy::Skip);
        let skipped = skipping.next_batch().await.unwrap().unwrap();
        assert!(skipped.skipped);
        assert_eq!(skipping.next_block(), 11);
    }

    #[tokio::test]
    async fn test_single_block_refusal_moves_to_next_provider() {
        let broken = Arc::new(ScriptedRpc::new("broken", 4));
        broken.set_effective_range(0);
        let healthy = Arc::new(ScriptedRpc::new("healthy", 4));
        let pool = pool_of(vec![broken, healthy.clone()]);
        let query = LogQuery::new(address_of(1), hash_of(9));

        let logs = scan(&pool, &query, 1, 8, UnknownErrorPolicy::Hold).await;

        assert!(logs.is_ok());
        assert_exact_cover(&healthy.fetched_ranges(), 1, 8);
    }
}
