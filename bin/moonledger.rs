use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use moonledger::{
    cron::jobs,
    db::{self, models::ChainKey},
    notify::{Notifier, NullNotifier, TelegramNotifier},
    utils::parse_address,
    worker::{top_earners, BackfillTarget},
    ChainManager, CheckpointSource, CronScheduler, LedgerStore, Settings,
};

#[derive(Parser, Debug)]
#[command(name = "moonledger", about = "MOON token ledger indexer")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow every enabled chain at the head (default)
    Monitor,
    /// Replay history for one record kind
    Backfill {
        #[arg(long, value_enum)]
        target: BackfillTarget,
        /// Only this chain (nova, one, eth)
        #[arg(long)]
        chain: Option<ChainKey>,
        /// Keep progress in a JSON file instead of the checkpoint table
        #[arg(long, conflicts_with = "derive_checkpoint")]
        checkpoint_file: Option<PathBuf>,
        /// Resume from the highest block already stored
        #[arg(long)]
        derive_checkpoint: bool,
        /// Start here regardless of any saved progress
        #[arg(long)]
        from_block: Option<u64>,
    },
    /// Refresh one holder, or run one pass of the stale balance job
    Refresh {
        #[arg(long)]
        address: Option<String>,
    },
    /// Merge holder rows whose addresses differ only by case
    Dedupe,
    /// Print MOON received per recipient from distributor addresses
    Earned {
        /// Only this chain (nova, one, eth)
        #[arg(long)]
        chain: Option<ChainKey>,
        /// Show at most this many recipients
        #[arg(long, default_value_t = 50)]
        top: usize,
    },
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(if cli.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()
        .context("Failed to initialize logger")?;

    let settings = Settings::new(&cli.config).with_context(|| {
        format!(
            "Failed to load {}. Please ensure it exists and is valid",
            cli.config
        )
    })?;

    let store = db::connect(&settings.postgres)
        .await
        .context("Failed to initialize database connection")?;

    let cancellation_token = CancellationToken::new();

    match cli.command.unwrap_or(Command::Monitor) {
        Command::Monitor => {
            let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&settings.telegram)?);
            let chain_manager = ChainManager::new(settings, store, notifier)?;
            run_monitor(chain_manager, cancellation_token).await
        },
        Command::Backfill {
            target,
            chain,
            checkpoint_file,
            derive_checkpoint,
            from_block,
        } => {
            let source = match (checkpoint_file, derive_checkpoint) {
                (Some(path), _) => CheckpointSource::File(path),
                (None, true) => CheckpointSource::Derived,
                (None, false) => CheckpointSource::Store,
            };
            let chain_manager = ChainManager::new(settings, store, Arc::new(NullNotifier))?;

            let token = cancellation_token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received shutdown signal (Ctrl+C), stopping after the current chunk...");
                    token.cancel();
                }
            });

            let reports = chain_manager
                .backfill(target, chain, &source, from_block, &cancellation_token)
                .await?;
            for report in &reports {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            Ok(())
        },
        Command::Refresh { address } => {
            let refresh = settings.refresh.clone();
            let chain_manager = ChainManager::new(settings, store.clone(), Arc::new(NullNotifier))?;
            let reconciler = chain_manager.reconciler();

            match address {
                Some(address) => {
                    let address = parse_address(&address)?;
                    match reconciler.refresh_all(address).await? {
                        Some(holder) => println!("{}", serde_json::to_string_pretty(&holder)?),
                        None => info!("{} is not tracked", address),
                    }
                },
                None => {
                    let refreshed =
                        jobs::refresh_balances::run(&reconciler, store.as_ref(), &refresh).await?;
                    info!("Refreshed {} holders", refreshed);
                },
            }
            Ok(())
        },
        Command::Dedupe => {
            let removed = store.merge_duplicate_holders().await?;
            info!("Merged {} duplicate holder rows", removed);
            Ok(())
        },
        Command::Earned { chain, top } => {
            let totals = top_earners(store.as_ref(), chain, Some(top)).await?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
            Ok(())
        },
    }
}

async fn run_monitor(
    chain_manager: ChainManager,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let cron_scheduler = CronScheduler::new(
        chain_manager.reconciler(),
        chain_manager.store(),
        chain_manager.refresh_settings().clone(),
    );

    let chain_manager_token = cancellation_token.child_token();
    let chain_manager_handle = tokio::spawn(async move {
        if let Err(e) = chain_manager.run(chain_manager_token).await {
            error!("Chain manager failed: {:#}", e);
        }
    });

    info!("Chain manager started");

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Ledger running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for chain manager to stop...");
    let _ = chain_manager_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("All tasks stopped");
    Ok(())
}
