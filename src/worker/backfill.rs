//! Resumable historical scans.
//!
//! A backfill walks `[checkpoint + 1, head]` with the chunked scanner and
//! hands every window to the same watcher the live monitor uses, so a
//! backfill and live monitoring converge on the same rows. The checkpoint is
//! saved after each window is handled, which makes a killed run resume right
//! after the last completed window.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::BackfillSettings,
    db::{
        models::{Checkpoint, Scope},
        LedgerStore,
    },
    worker::{
        scanner::{ScanCursor, UnknownErrorPolicy},
        ChainContext, Watcher,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackfillTarget {
    Burns,
    Swaps,
    Distributions,
}

/// Where a backfill keeps its progress.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last fully processed block.
    async fn load(&self) -> anyhow::Result<Option<u64>>;

    async fn save(&self, block: u64) -> anyhow::Result<()>;

    fn describe(&self) -> String;
}

/// The store's checkpoint table.
pub struct StoreCheckpoint {
    store: Arc<dyn LedgerStore>,
    scope: Scope,
}

impl StoreCheckpoint {
    pub fn new(store: Arc<dyn LedgerStore>, scope: Scope) -> Self {
        Self { store, scope }
    }
}

#[async_trait]
impl CheckpointStore for StoreCheckpoint {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        self.store.get_checkpoint(&self.scope).await
    }

    async fn save(&self, block: u64) -> anyhow::Result<()> {
        self.store.set_checkpoint(&self.scope, block).await
    }

    fn describe(&self) -> String {
        format!("checkpoint table ({})", self.scope)
    }
}

/// Highest block among rows already persisted for the target. Nothing is
/// saved: the rows themselves are the progress.
pub struct DerivedCheckpoint {
    store: Arc<dyn LedgerStore>,
    scope: Scope,
}

impl DerivedCheckpoint {
    pub fn new(store: Arc<dyn LedgerStore>, scope: Scope) -> Self {
        Self { store, scope }
    }
}

#[async_trait]
impl CheckpointStore for DerivedCheckpoint {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        self.store.max_block(&self.scope).await
    }

    async fn save(&self, _block: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("max persisted block ({})", self.scope)
    }
}

/// A JSON file holding one [`Checkpoint`], replaced atomically on save.
pub struct FileCheckpoint {
    path: PathBuf,
    scope: Scope,
}

impl FileCheckpoint {
    pub fn new(path: impl AsRef<Path>, scope: Scope) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            scope,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            result => result.with_context(|| format!("Failed to read {}", self.path.display()))?,
        };

        let checkpoint: Checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed checkpoint file {}", self.path.display()))?;
        let scope = self.scope.to_string();
        if checkpoint.scope != scope {
            bail!(
                "Checkpoint file {} belongs to {}, not {}",
                self.path.display(),
                checkpoint.scope,
                scope
            );
        }
        Ok(Some(checkpoint.block_number))
    }

    /// Never moves the saved block backwards.
    async fn save(&self, block: u64) -> anyhow::Result<()> {
        let block = match self.load().await? {
            Some(saved) if saved >= block => return Ok(()),
            _ => block,
        };
        let body = serde_json::to_string_pretty(&Checkpoint::new(&self.scope, block))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub target: String,
    pub start_block: u64,
    /// Last block covered, `start_block - 1` if nothing was processed.
    pub final_block: u64,
    pub chunks: u64,
    pub logs: u64,
    /// Windows passed over after a non-retryable provider error.
    pub skipped_chunks: u64,
    /// False when the run was cancelled before reaching the head.
    pub completed: bool,
}

/// One backfill run for one watcher on one chain.
pub struct Backfill {
    ctx: Arc<ChainContext>,
    watcher: Arc<dyn Watcher>,
    checkpoint: Box<dyn CheckpointStore>,
    start_block: u64,
    from_override: Option<u64>,
    max_stalls: u32,
    stall_pause: Duration,
}

impl Backfill {
    pub fn new(
        ctx: Arc<ChainContext>,
        watcher: Arc<dyn Watcher>,
        checkpoint: Box<dyn CheckpointStore>,
        start_block: u64,
        settings: &BackfillSettings,
    ) -> Self {
        Self {
            ctx,
            watcher,
            checkpoint,
            start_block,
            from_override: None,
            max_stalls: settings.max_stalls,
            stall_pause: Duration::from_secs(settings.stall_pause_secs),
        }
    }

    /// Start at `block` regardless of the saved checkpoint.
    pub fn from_block(mut self, block: Option<u64>) -> Self {
        self.from_override = block;
        self
    }

    pub async fn run(&self, cancellation_token: &CancellationToken) -> anyhow::Result<BackfillReport> {
        let chain = self.ctx.chain;
        let target = self.watcher.name().to_string();

        let from = match self.from_override {
            Some(block) => block,
            None => match self.checkpoint.load().await? {
                Some(block) => block + 1,
                None => self.start_block,
            },
        };
        let head = self
            .ctx
            .pool
            .head()
            .await
            .with_context(|| format!("[{}] Failed to read head for backfill", chain))?;

        let mut report = BackfillReport {
            target: target.clone(),
            start_block: from,
            final_block: from.saturating_sub(1),
            chunks: 0,
            logs: 0,
            skipped_chunks: 0,
            completed: false,
        };

        if from > head {
            info!("[{}] {} already at head {}", chain, target, head);
            report.completed = true;
            return Ok(report);
        }

        info!(
            "[{}] Backfilling {} from {} to {} ({})",
            chain,
            target,
            from,
            head,
            self.checkpoint.describe()
        );

        let query = self.watcher.query();
        let mut cursor = ScanCursor::new(&self.ctx.pool, &query, from, head, UnknownErrorPolicy::Skip);
        let mut stalls = 0u32;

        loop {
            if cancellation_token.is_cancelled() {
                info!(
                    "[{}] {} backfill cancelled after block {}",
                    chain, target, report.final_block
                );
                return Ok(report);
            }

            let batch = match cursor.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    stalls += 1;
                    if stalls > self.max_stalls {
                        return Err(anyhow::Error::new(e).context(format!(
                            "[{}] {} backfill stalled {} times at block {}",
                            chain,
                            target,
                            stalls,
                            cursor.next_block()
                        )));
                    }
                    warn!(
                        "[{}] {} stalled ({}/{}): {}",
                        chain, target, stalls, self.max_stalls, e
                    );
                    if !self.pause(cancellation_token).await {
                        return Ok(report);
                    }
                    continue;
                },
            };

            while let Err(e) = self.watcher.handle(&batch.logs).await {
                stalls += 1;
                if stalls > self.max_stalls {
                    return Err(e.context(format!(
                        "[{}] {} failed to handle blocks {}-{}",
                        chain, target, batch.from, batch.to
                    )));
                }
                warn!(
                    "[{}] {} failed on blocks {}-{} ({}/{}): {:#}",
                    chain, target, batch.from, batch.to, stalls, self.max_stalls, e
                );
                if !self.pause(cancellation_token).await {
                    return Ok(report);
                }
            }

            self.checkpoint
                .save(batch.to)
                .await
                .with_context(|| format!("[{}] Failed to save checkpoint {}", chain, batch.to))?;

            stalls = 0;
            report.chunks += 1;
            report.logs += batch.logs.len() as u64;
            report.final_block = batch.to;
            if batch.skipped {
                report.skipped_chunks += 1;
            }

            if !batch.logs.is_empty() || report.chunks % 100 == 0 {
                info!(
                    "[{}] {}: blocks {}-{} done, {} logs ({} of {})",
                    chain,
                    target,
                    batch.from,
                    batch.to,
                    batch.logs.len(),
                    batch.to,
                    head
                );
            }
        }

        report.completed = true;
        info!(
            "[{}] {} backfill complete at block {}: {} chunks, {} logs, {} skipped",
            chain, target, report.final_block, report.chunks, report.logs, report.skipped_chunks
        );
        Ok(report)
    }

    /// Sleep out a stall. False if cancelled meanwhile.
    async fn pause(&self, cancellation_token: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(self.stall_pause) => true,
        }
    }
}
