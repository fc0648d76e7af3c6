use std::sync::Arc;

use log::info;

use crate::config::PostgresSettings;

pub mod memory;
pub mod models;
pub mod postgres;
mod store;

pub use memory::MemoryStore;
pub use postgres::PostgresClient;
pub use store::LedgerStore;

/// Connect to PostgreSQL and apply the schema.
pub async fn connect(settings: &PostgresSettings) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let postgres = PostgresClient::new(settings).await?;
    postgres.migrate().await?;
    info!("Ledger store ready");
    Ok(Arc::new(postgres))
}
