use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::models::ChainKey;

/// PostgreSQL connection configuration for the ledger store.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_pool_size() -> usize {
    16
}

fn default_connect_retries() -> u32 {
    3
}

/// Telegram channel for burn and swap alerts.
///
/// Without a bot token alerts are logged and dropped.
#[derive(Debug, Deserialize, Clone)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel_id: default_channel_id(),
            api_url: default_telegram_api(),
        }
    }
}

fn default_channel_id() -> String {
    "@rCryptoCurrencyOfficial".to_string()
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

/// Minimum MOON amounts for persisting and for alerting.
///
/// The two floors are independent: records below `notify_min_amount` are
/// still stored as long as they clear `persist_min_amount`.
#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdSettings {
    #[serde(default)]
    pub persist_min_amount: f64,
    #[serde(default = "default_notify_min_amount")]
    pub notify_min_amount: f64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            persist_min_amount: 0.0,
            notify_min_amount: default_notify_min_amount(),
        }
    }
}

fn default_notify_min_amount() -> f64 {
    0.5
}

/// Backoff shared by every RPC caller.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries of a rate-limited request before moving to the next provider.
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    /// Retries of a timed out / reset request before moving to the next provider.
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_attempts: default_rate_limit_attempts(),
            transient_attempts: default_transient_attempts(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_rate_limit_attempts() -> u32 {
    5
}

fn default_transient_attempts() -> u32 {
    3
}

/// A JSON-RPC endpoint. Providers are tried in the order listed.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub url: String,
    /// Largest block span this endpoint accepts for `eth_getLogs`.
    #[serde(default)]
    pub max_block_range: Option<u64>,
}

/// Token side of a pool.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenSettings {
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    18
}

/// A V4 pool id multiplexed through the pool manager.
#[derive(Debug, Deserialize, Clone)]
pub struct V4PoolSettings {
    pub id: String,
    pub name: String,
    pub token0: TokenSettings,
    pub token1: TokenSettings,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DexVersion {
    V2,
    V3,
    V4,
}

/// A DEX pool (V2 pair, V3 pool) or a V4 pool manager.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolSettings {
    pub dex: String,
    pub version: DexVersion,
    pub address: String,
    #[serde(default)]
    pub token0: Option<TokenSettings>,
    #[serde(default)]
    pub token1: Option<TokenSettings>,
    #[serde(default)]
    pub pools: Vec<V4PoolSettings>,
}

/// Per-chain monitoring configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub key: ChainKey,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// MOON contract, defaults to the known deployment.
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Initial block span per monitor cycle, defaults to the first provider's range.
    #[serde(default)]
    pub chunk_size: Option<u64>,
    /// First block for backfills without a checkpoint.
    #[serde(default)]
    pub start_block: u64,
    /// Refresh sender/recipient balances on every Transfer.
    #[serde(default = "default_true")]
    pub track_balances: bool,
    /// Append the chain's public endpoint after the configured providers.
    #[serde(default = "default_true")]
    pub public_fallback: bool,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    /// Overrides the built-in pool registry when set.
    #[serde(default)]
    pub pools: Option<Vec<PoolSettings>>,
}

fn default_true() -> bool {
    true
}

/// Historical scan behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct BackfillSettings {
    /// Consecutive failed attempts on the same chunk before giving up.
    #[serde(default = "default_max_stalls")]
    pub max_stalls: u32,
    #[serde(default = "default_stall_pause_secs")]
    pub stall_pause_secs: u64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            max_stalls: default_max_stalls(),
            stall_pause_secs: default_stall_pause_secs(),
        }
    }
}

fn default_max_stalls() -> u32 {
    10
}

fn default_stall_pause_secs() -> u64 {
    10
}

/// Live monitor pacing.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSettings {
    /// Pause between chunks while catching up to the head.
    #[serde(default = "default_catch_up_pause_ms")]
    pub catch_up_pause_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            catch_up_pause_ms: default_catch_up_pause_ms(),
        }
    }
}

fn default_catch_up_pause_ms() -> u64 {
    2_000
}

/// Stale balance refresh job.
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_minutes: default_stale_after_minutes(),
            batch_size: default_batch_size(),
            max_batches: default_max_batches(),
            batch_pause_ms: default_batch_pause_ms(),
            interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_stale_after_minutes() -> i64 {
    60
}

fn default_batch_size() -> usize {
    100
}

fn default_max_batches() -> usize {
    10
}

fn default_batch_pause_ms() -> u64 {
    1_000
}

fn default_refresh_interval_secs() -> u64 {
    3_600
}

/// Root application configuration.
///
/// Loaded from `config.yaml` (or the `--config` path) at startup, with
/// `MOONLEDGER__SECTION__KEY` environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub thresholds: ThresholdSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub backfill: BackfillSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    /// Addresses whose outbound transfers count as distributions.
    #[serde(default = "default_distributors")]
    pub distributors: Vec<String>,
    pub chains: Vec<ChainSettings>,
}

fn default_distributors() -> Vec<String> {
    vec![
        "0x0000000000000000000000000000000000000000".to_string(),
        "0xda9338361d1cfab5813a92697c3f0c0c42368fb3".to_string(),
    ]
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("MOONLEDGER").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    pub fn chain(&self, key: ChainKey) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.key == key && c.enabled)
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let yaml = r#"
postgres:
  host: localhost
  port: 5432
  user: moon
  password: secret
  database: ledger
chains:
  - key: nova
    providers:
      - name: alchemy
        url: https://arbnova.example/v2/key
        max_block_range: 5
  - key: eth
    enabled: false
"#;
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.thresholds.notify_min_amount, 0.5);
        assert_eq!(settings.thresholds.persist_min_amount, 0.0);
        assert_eq!(settings.telegram.channel_id, "@rCryptoCurrencyOfficial");
        assert_eq!(settings.distributors.len(), 2);
        assert_eq!(settings.refresh.batch_size, 100);
        assert!(settings.chain(ChainKey::Nova).is_some());
        assert!(settings.chain(ChainKey::Eth).is_none());
        assert_eq!(settings.chains[0].providers[0].max_block_range, Some(5));
        assert!(settings.chains[0].track_balances);
    }
}
