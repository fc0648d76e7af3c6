//! Outbound alerts for burns and swaps.
//!
//! Sending is fire-and-forget: a failed alert is logged and never reaches
//! the watcher that raised it.

use async_trait::async_trait;
use log::debug;

pub mod message;
pub mod telegram;

pub use telegram::TelegramNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Drops every message. Used by backfills and the one-shot CLI commands.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) {
        debug!("Notification suppressed: {}", text.lines().next().unwrap_or_default());
    }
}
