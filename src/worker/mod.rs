pub mod backfill;
pub mod burn;
pub mod chains;
pub mod context;
pub mod distribution;
pub mod monitor;
pub mod pools;
pub mod reconciler;
pub mod scanner;
pub mod swap;
pub mod transfer;
pub mod watcher;

pub use backfill::{Backfill, BackfillReport, BackfillTarget};
pub use burn::BurnWatcher;
pub use chains::{ChainManager, CheckpointSource};
pub use context::ChainContext;
pub use distribution::{top_earners, DistributionWatcher};
pub use monitor::{ChainMonitor, CycleOutcome, MonitorState};
pub use reconciler::Reconciler;
pub use scanner::{scan, LogBatch, ScanCursor, ScanError, UnknownErrorPolicy};
pub use swap::SwapWatcher;
pub use transfer::TransferWatcher;
pub use watcher::Watcher;
