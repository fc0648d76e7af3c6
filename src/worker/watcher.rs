use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::rpc::LogQuery;

/// A consumer of one kind of log on one chain.
///
/// The same watcher serves the live monitor and backfills, so both paths
/// produce identical store effects. `handle` receives logs in block order.
/// Items that fail to decode are skipped inside `handle`; an `Err` means
/// the batch must be delivered again, which upserts make safe.
#[async_trait]
pub trait Watcher: Send + Sync {
    fn name(&self) -> &str;

    fn query(&self) -> LogQuery;

    async fn handle(&self, logs: &[Log]) -> anyhow::Result<()>;
}
