use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ChainSettings, RefreshSettings, Settings},
    db::{
        models::{ChainKey, Scope},
        LedgerStore,
    },
    notify::Notifier,
    rpc::{ProviderPool, RetryPolicy},
    utils::parse_address,
    worker::{
        backfill::{
            Backfill, BackfillReport, BackfillTarget, CheckpointStore, DerivedCheckpoint,
            FileCheckpoint, StoreCheckpoint,
        },
        monitor::ChainMonitor,
        pools::DexPool,
        BurnWatcher, ChainContext, DistributionWatcher, Reconciler, SwapWatcher, TransferWatcher,
        Watcher,
    },
};

/// How long a stopping monitor gets before it is abandoned.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where backfills read and write their progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    /// The store's checkpoint table.
    Store,
    /// A JSON file. With several jobs, each gets its own file next to it.
    File(PathBuf),
    /// Highest block among already persisted rows.
    Derived,
}

/// A configured, enabled chain.
struct ChainEntry {
    settings: ChainSettings,
    ctx: Arc<ChainContext>,
    pools: Vec<DexPool>,
}

/// A running chain monitor
struct RunningChain {
    chain: ChainKey,
    handle: JoinHandle<()>,
}

/// Builds per-chain contexts and watchers from [`Settings`] and runs them.
///
/// One [`ChainContext`] per enabled chain is shared by that chain's monitor,
/// backfills and the reconciler, so caches and provider order are common to
/// all of them.
pub struct ChainManager {
    settings: Settings,
    store: Arc<dyn LedgerStore>,
    chains: Vec<ChainEntry>,
    reconciler: Arc<Reconciler>,
    distributors: Vec<Address>,
}

impl ChainManager {
    pub fn new(
        settings: Settings,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let policy = RetryPolicy::from_settings(&settings.retry);

        let mut chains = Vec::new();
        for chain_settings in settings.chains.iter().filter(|c| c.enabled) {
            let chain = chain_settings.key;
            if chains.iter().any(|c: &ChainEntry| c.ctx.chain == chain) {
                bail!("Chain {} is configured twice", chain);
            }

            let token = match &chain_settings.token_address {
                Some(address) => parse_address(address)?,
                None => chain.default_token_address(),
            };
            let explorer_url = chain_settings
                .explorer_url
                .clone()
                .unwrap_or_else(|| chain.default_explorer_url().to_string());
            let pool = ProviderPool::from_settings(
                chain,
                &chain_settings.providers,
                chain_settings.public_fallback,
                policy.clone(),
            )
            .with_context(|| format!("Failed to build providers for {}", chain))?;
            let pools = DexPool::for_chain(chain, chain_settings.pools.as_deref())
                .with_context(|| format!("Invalid pool configuration for {}", chain))?;

            info!(
                "[{}] {} provider(s), {} pool(s), token {}",
                chain,
                pool.providers().len(),
                pools.len(),
                token
            );

            let ctx = Arc::new(ChainContext::new(
                chain,
                token,
                explorer_url,
                pool,
                store.clone(),
                notifier.clone(),
            ));
            chains.push(ChainEntry {
                settings: chain_settings.clone(),
                ctx,
                pools,
            });
        }

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            chains.iter().map(|c| c.ctx.clone()).collect(),
        ));
        let distributors = settings
            .distributors
            .iter()
            .map(|d| parse_address(d))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            settings,
            store,
            chains,
            reconciler,
            distributors,
        })
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    pub fn refresh_settings(&self) -> &RefreshSettings {
        &self.settings.refresh
    }

    pub fn chain_keys(&self) -> Vec<ChainKey> {
        self.chains.iter().map(|c| c.ctx.chain).collect()
    }

    /// Watchers for the live monitor: burns, each pool, and balance tracking.
    fn live_watchers(&self, entry: &ChainEntry) -> Vec<Arc<dyn Watcher>> {
        let thresholds = &self.settings.thresholds;
        let mut watchers: Vec<Arc<dyn Watcher>> = vec![Arc::new(BurnWatcher::new(
            entry.ctx.clone(),
            self.reconciler.clone(),
            thresholds.clone(),
        ))];

        for pool in &entry.pools {
            watchers.push(Arc::new(SwapWatcher::new(
                entry.ctx.clone(),
                self.reconciler.clone(),
                pool.clone(),
                thresholds.clone(),
            )));
        }

        if entry.settings.track_balances {
            watchers.push(Arc::new(TransferWatcher::new(
                entry.ctx.clone(),
                self.reconciler.clone(),
            )));
        }
        watchers
    }

    fn monitor_for(&self, entry: &ChainEntry) -> ChainMonitor {
        let chain = entry.ctx.chain;
        let chunk_size = entry
            .settings
            .chunk_size
            .unwrap_or_else(|| entry.ctx.pool.max_block_range());
        let poll_interval = entry
            .settings
            .poll_interval_secs
            .unwrap_or_else(|| chain.default_poll_interval_secs());

        ChainMonitor::new(
            entry.ctx.clone(),
            self.live_watchers(entry),
            chunk_size,
            Duration::from_secs(poll_interval),
            Duration::from_millis(self.settings.monitor.catch_up_pause_ms),
        )
    }

    /// Run one monitor per chain until `cancellation_token` fires.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        if self.chains.is_empty() {
            warn!("ChainManager: No enabled chains configured!");
            return Ok(());
        }

        let mut running = Vec::with_capacity(self.chains.len());
        for entry in &self.chains {
            let monitor = self.monitor_for(entry);
            let token = cancellation_token.child_token();
            running.push(RunningChain {
                chain: entry.ctx.chain,
                handle: tokio::spawn(monitor.run(token)),
            });
        }
        info!("ChainManager: Started {} chain monitor(s)", running.len());

        cancellation_token.cancelled().await;
        info!("ChainManager: Stopping all chain monitors...");

        for chain in running {
            match tokio::time::timeout(STOP_TIMEOUT, chain.handle).await {
                Ok(Ok(())) => info!("[{}] Monitor stopped gracefully", chain.chain),
                Ok(Err(e)) => error!("[{}] Monitor task failed: {}", chain.chain, e),
                Err(_) => warn!(
                    "[{}] Monitor did not stop within timeout, continuing...",
                    chain.chain
                ),
            }
        }

        info!("ChainManager: Shutdown complete");
        Ok(())
    }

    /// Backfill `target` on one chain or every enabled chain, one job at a
    /// time. Stops at the first failed job.
    pub async fn backfill(
        &self,
        target: BackfillTarget,
        chain: Option<ChainKey>,
        source: &CheckpointSource,
        from_block: Option<u64>,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<BackfillReport>> {
        let entries: Vec<&ChainEntry> = self
            .chains
            .iter()
            .filter(|c| chain.map_or(true, |key| c.ctx.chain == key))
            .collect();
        if entries.is_empty() {
            bail!("No enabled chain matches {:?}", chain);
        }

        let mut jobs = Vec::new();
        for entry in entries {
            jobs.extend(self.backfill_watchers(entry, target));
        }
        let many = jobs.len() > 1;

        let mut reports = Vec::with_capacity(jobs.len());
        for (entry, watcher, scope) in jobs {
            if cancellation_token.is_cancelled() {
                break;
            }

            let checkpoint: Box<dyn CheckpointStore> = match source {
                CheckpointSource::Store => {
                    Box::new(StoreCheckpoint::new(self.store.clone(), scope.clone()))
                },
                CheckpointSource::Derived => {
                    Box::new(DerivedCheckpoint::new(self.store.clone(), scope.clone()))
                },
                CheckpointSource::File(path) => {
                    let path = if many {
                        job_checkpoint_path(path, &scope.to_string())
                    } else {
                        path.clone()
                    };
                    Box::new(FileCheckpoint::new(path, scope.clone()))
                },
            };

            let report = Backfill::new(
                entry.ctx.clone(),
                watcher,
                checkpoint,
                entry.settings.start_block,
                &self.settings.backfill,
            )
            .from_block(from_block)
            .run(cancellation_token)
            .await
            .with_context(|| format!("Backfill {} failed", scope))?;
            reports.push(report);
        }

        Ok(reports)
    }

    fn backfill_watchers<'a>(
        &self,
        entry: &'a ChainEntry,
        target: BackfillTarget,
    ) -> Vec<(&'a ChainEntry, Arc<dyn Watcher>, Scope)> {
        let thresholds = &self.settings.thresholds;
        match target {
            BackfillTarget::Burns => {
                let watcher = BurnWatcher::new(
                    entry.ctx.clone(),
                    self.reconciler.clone(),
                    thresholds.clone(),
                )
                .without_notifications();
                let scope = watcher.scope();
                vec![(entry, Arc::new(watcher) as Arc<dyn Watcher>, scope)]
            },
            BackfillTarget::Swaps => entry
                .pools
                .iter()
                .map(|pool| {
                    let watcher = SwapWatcher::new(
                        entry.ctx.clone(),
                        self.reconciler.clone(),
                        pool.clone(),
                        thresholds.clone(),
                    )
                    .without_notifications();
                    let scope = watcher.scope();
                    (entry, Arc::new(watcher) as Arc<dyn Watcher>, scope)
                })
                .collect(),
            BackfillTarget::Distributions => self
                .distributors
                .iter()
                .map(|distributor| {
                    let watcher = DistributionWatcher::new(
                        entry.ctx.clone(),
                        *distributor,
                        self.distributors.clone(),
                    );
                    let scope = watcher.scope();
                    (entry, Arc::new(watcher) as Arc<dyn Watcher>, scope)
                })
                .collect(),
        }
    }
}

/// `dir/name.json` becomes `dir/name-<scope>.json`, with the scope made
/// filename-safe.
fn job_checkpoint_path(base: &Path, scope: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    let suffix: String = scope
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    base.with_file_name(format!("{}-{}.json", stem, suffix))
}
