use alloy::{
    eips::BlockNumberOrTag,
    network::TransactionResponse,
    primitives::{Address, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
};
use anyhow::Context;
use async_trait::async_trait;
use url::Url;

use crate::{abis::IERC20, config::ProviderSettings, rpc::error::RpcError};

/// Span assumed for endpoints that do not declare one.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 100;

/// Log selection owned by one watcher: a contract, an event and optional
/// indexed-argument constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub event: B256,
    /// Accepted values of the first indexed argument, empty matches any.
    pub topic1: Vec<B256>,
    /// Accepted values of the second indexed argument, empty matches any.
    pub topic2: Vec<B256>,
}

impl LogQuery {
    pub fn new(address: Address, event: B256) -> Self {
        Self {
            address,
            event,
            topic1: Vec::new(),
            topic2: Vec::new(),
        }
    }

    pub fn with_topic1(mut self, topics: Vec<B256>) -> Self {
        self.topic1 = topics;
        self
    }

    pub fn with_topic2(mut self, topics: Vec<B256>) -> Self {
        self.topic2 = topics;
        self
    }

    pub fn to_filter(&self, from_block: u64, to_block: u64) -> Filter {
        let mut filter = Filter::new()
            .address(self.address)
            .event_signature(self.event)
            .from_block(from_block)
            .to_block(to_block);

        if !self.topic1.is_empty() {
            filter = filter.topic1(self.topic1.clone());
        }
        if !self.topic2.is_empty() {
            filter = filter.topic2(self.topic2.clone());
        }
        filter
    }

    /// Whether `log` would be returned by this query (block range aside).
    pub fn matches(&self, log: &Log) -> bool {
        let topics = log.inner.data.topics();
        let accepts = |allowed: &[B256], idx: usize| {
            allowed.is_empty() || topics.get(idx).is_some_and(|t| allowed.contains(t))
        };

        log.inner.address == self.address
            && topics.first() == Some(&self.event)
            && accepts(&self.topic1, 1)
            && accepts(&self.topic2, 2)
    }
}

/// Order logs by block, then position in block.
pub fn sort_logs(logs: &mut [Log]) {
    logs.sort_by_key(|log| (log.block_number.unwrap_or_default(), log.log_index.unwrap_or_default()));
}

/// One JSON-RPC endpoint for one chain.
///
/// Every failure comes back already classified, see [`RpcError`].
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn name(&self) -> &str;

    /// Largest block span accepted by `get_logs`.
    fn max_block_range(&self) -> u64;

    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError>;

    /// Origin sender of a transaction, `None` if the node does not know it.
    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>, RpcError>;

    /// Unix timestamp of a block, `None` if the node does not know it.
    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, RpcError>;

    /// ERC-20 `balanceOf(holder)` at the latest block.
    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, RpcError>;
}

/// HTTP JSON-RPC endpoint backed by an alloy provider.
pub struct RpcProvider {
    name: String,
    max_block_range: u64,
    provider: DynProvider,
}

impl RpcProvider {
    pub fn new(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.url)
            .with_context(|| format!("Invalid RPC URL for provider {}", settings.name))?;

        let provider = DynProvider::new(ProviderBuilder::new().connect_http(url));

        Ok(Self {
            name: settings.name.clone(),
            max_block_range: settings
                .max_block_range
                .unwrap_or(DEFAULT_MAX_BLOCK_RANGE)
                .max(1),
            provider,
        })
    }
}

#[async_trait]
impl ChainRpc for RpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let filter = query.to_filter(from_block, to_block);
        Ok(self.provider.get_logs(&filter).await?)
    }

    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>, RpcError> {
        let tx = self.provider.get_transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| TransactionResponse::from(&tx)))
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, RpcError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, RpcError> {
        let contract = IERC20::new(token, &self.provider);
        Ok(contract.balanceOf(holder).call().await?)
    }
}
