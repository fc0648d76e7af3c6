mod config;

pub use self::config::{
    BackfillSettings, ChainSettings, DexVersion, MonitorSettings, PoolSettings, PostgresSettings,
    ProviderSettings, RefreshSettings, RetrySettings, Settings, TelegramSettings,
    ThresholdSettings, TokenSettings, V4PoolSettings,
};
