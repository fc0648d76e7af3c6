pub mod abis;
pub mod config;
pub mod cron;
pub mod db;
pub mod notify;
pub mod rpc;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::LedgerStore;
pub use worker::{ChainManager, CheckpointSource};
