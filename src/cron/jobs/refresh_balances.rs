//! Job to refresh holder balances that have not been read recently.
//!
//! Live transfer tracking keeps active holders current; this catches the
//! rest (missed refreshes, chains without balance tracking, manual links).

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};

use crate::{
    config::RefreshSettings, db::LedgerStore, utils::parse_address, worker::Reconciler,
};

/// Refresh stale holders in batches, labeled ones first, then
/// username-linked, then everyone else. Returns the number refreshed.
pub async fn run(
    reconciler: &Reconciler,
    store: &dyn LedgerStore,
    settings: &RefreshSettings,
) -> Result<usize> {
    info!("Starting refresh_balances job...");
    let start = std::time::Instant::now();

    let before = Utc::now() - chrono::Duration::minutes(settings.stale_after_minutes);
    let mut refreshed = 0;

    for batch in 0..settings.max_batches {
        let holders = store.stale_holders(before, settings.batch_size).await?;
        if holders.is_empty() {
            break;
        }

        let mut progressed = 0;
        for holder in &holders {
            let address = match parse_address(&holder.address) {
                Ok(address) => address,
                Err(e) => {
                    warn!("Skipping holder with bad address: {:#}", e);
                    continue;
                },
            };
            match reconciler.refresh_all(address).await {
                Ok(_) => progressed += 1,
                Err(e) => warn!("Failed to refresh {}: {:#}", holder.address, e),
            }
        }

        refreshed += progressed;
        info!(
            "refresh_balances batch {}: {}/{} holders refreshed",
            batch + 1,
            progressed,
            holders.len()
        );

        // Whatever failed is still stale and would come back first.
        if progressed == 0 || holders.len() < settings.batch_size {
            break;
        }
        tokio::time::sleep(Duration::from_millis(settings.batch_pause_ms)).await;
    }

    info!(
        "Completed refresh_balances job in {:?} ({} holders)",
        start.elapsed(),
        refreshed
    );
    Ok(refreshed)
}
