use std::{future::Future, sync::Arc};

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
};
use log::{debug, warn};

use crate::{
    config::ProviderSettings,
    db::models::ChainKey,
    rpc::{
        error::{ErrorKind, RpcError},
        provider::{sort_logs, ChainRpc, LogQuery, RpcProvider},
        retry::{with_retry, RetryPolicy},
    },
};

/// Ordered fallback list of endpoints for one chain.
///
/// Point calls walk the list in order, giving each provider the shared
/// retry policy before moving on.
pub struct ProviderPool {
    chain: ChainKey,
    providers: Vec<Arc<dyn ChainRpc>>,
    policy: RetryPolicy,
}

impl ProviderPool {
    pub fn new(chain: ChainKey, providers: Vec<Arc<dyn ChainRpc>>, policy: RetryPolicy) -> Self {
        Self {
            chain,
            providers,
            policy,
        }
    }

    /// Build the pool from config, appending the chain's public endpoint
    /// unless disabled.
    pub fn from_settings(
        chain: ChainKey,
        settings: &[ProviderSettings],
        public_fallback: bool,
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let mut providers: Vec<Arc<dyn ChainRpc>> = Vec::with_capacity(settings.len() + 1);
        for provider in settings {
            providers.push(Arc::new(RpcProvider::new(provider)?));
        }

        if public_fallback || providers.is_empty() {
            let public = ProviderSettings {
                name: "public".to_string(),
                url: chain.public_rpc_url().to_string(),
                max_block_range: Some(chain.default_max_block_range()),
            };
            providers.push(Arc::new(RpcProvider::new(&public)?));
        }

        Ok(Self::new(chain, providers, policy))
    }

    pub fn chain(&self) -> ChainKey {
        self.chain
    }

    pub fn providers(&self) -> &[Arc<dyn ChainRpc>] {
        &self.providers
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Span of the preferred provider.
    pub fn max_block_range(&self) -> u64 {
        self.providers
            .first()
            .map(|p| p.max_block_range())
            .unwrap_or(1)
    }

    pub async fn head(&self) -> Result<u64, RpcError> {
        self.with_fallback("eth_blockNumber", &self.policy, |p| async move {
            p.block_number().await
        })
        .await
    }

    /// Single pass over the providers for one log window.
    ///
    /// Transient failures are retried per provider. Range and rate-limit
    /// failures move on to the next provider and, if all fail, are handed
    /// back so the caller can shrink the window or back off.
    pub async fn fetch_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let policy = self.policy.transient_only();
        let mut logs = self
            .with_fallback("eth_getLogs", &policy, |p| async move {
                if to_block - from_block + 1 > p.max_block_range() {
                    return Err(RpcError::RangeTooLarge(format!(
                        "{} blocks exceeds {} limit of {}",
                        to_block - from_block + 1,
                        p.name(),
                        p.max_block_range()
                    )));
                }
                p.get_logs(query, from_block, to_block).await
            })
            .await?;

        sort_logs(&mut logs);
        Ok(logs)
    }

    pub async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>, RpcError> {
        self.with_fallback("eth_getTransactionByHash", &self.policy, |p| async move {
            p.transaction_sender(hash).await
        })
        .await
    }

    pub async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, RpcError> {
        self.with_fallback("eth_getBlockByNumber", &self.policy, |p| async move {
            p.block_timestamp(block).await
        })
        .await
    }

    pub async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, RpcError> {
        self.with_fallback("balanceOf", &self.policy, |p| async move {
            p.balance_of(token, holder).await
        })
        .await
    }

    async fn with_fallback<T, F, Fut>(
        &self,
        method: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T, RpcError>
    where
        F: Fn(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut errors = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let label = format!("[{}] {} via {}", self.chain, method, provider.name());
            match with_retry(policy, &label, || op(provider.clone())).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("{} gave up: {}", label, e);
                    errors.push(e);
                },
            }
        }

        let err = most_actionable(errors)
            .unwrap_or_else(|| RpcError::Unknown(format!("no providers for {}", self.chain)));
        warn!("[{}] {} failed on every provider: {}", self.chain, method, err);
        Err(err)
    }
}

/// Pick the failure the caller can do the most with: a range error can be
/// fixed by shrinking, a rate limit by waiting.
pub fn most_actionable(errors: Vec<RpcError>) -> Option<RpcError> {
    let rank = |e: &RpcError| match e.kind() {
        ErrorKind::RangeTooLarge => 0,
        ErrorKind::RateLimited => 1,
        ErrorKind::Transient => 2,
        ErrorKind::Unknown => 3,
    };
    errors.into_iter().rev().min_by_key(rank)
}
