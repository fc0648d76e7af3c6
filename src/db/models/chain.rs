use std::{fmt, str::FromStr};

use alloy::primitives::{address, Address};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

/// One of the three chains the MOON token lives on.
///
/// Serialized in config files by its short key (`nova`, `one`, `eth`),
/// stored in PostgreSQL as the `ledger.chain_key` enum using the display name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSql, FromSql,
)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "chain_key")]
pub enum ChainKey {
    #[postgres(name = "Arbitrum Nova")]
    Nova,
    #[postgres(name = "Arbitrum One")]
    One,
    #[postgres(name = "Ethereum")]
    Eth,
}

impl ChainKey {
    pub const ALL: [ChainKey; 3] = [ChainKey::Nova, ChainKey::One, ChainKey::Eth];

    /// Short key used in config files, checkpoint scopes and the CLI.
    pub fn key(&self) -> &'static str {
        match self {
            ChainKey::Nova => "nova",
            ChainKey::One => "one",
            ChainKey::Eth => "eth",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ChainKey::Nova => "Arbitrum Nova",
            ChainKey::One => "Arbitrum One",
            ChainKey::Eth => "Ethereum",
        }
    }

    /// MOON token contract on this chain.
    pub fn default_token_address(&self) -> Address {
        match self {
            ChainKey::Nova => address!("0057ac2d777797d31cd3f8f13bf5e927571d6ad0"),
            ChainKey::One => address!("24404dc041d74cd03cfe28855f555559390c931b"),
            ChainKey::Eth => address!("b2490e357980ce57bf5745e181e537a64eb367b1"),
        }
    }

    pub fn default_explorer_url(&self) -> &'static str {
        match self {
            ChainKey::Nova => "https://nova.arbiscan.io",
            ChainKey::One => "https://arbiscan.io",
            ChainKey::Eth => "https://etherscan.io",
        }
    }

    /// Public endpoint of last resort, appended after configured providers.
    pub fn public_rpc_url(&self) -> &'static str {
        match self {
            ChainKey::Nova => "https://nova.arbitrum.io/rpc",
            ChainKey::One => "https://arb1.arbitrum.io/rpc",
            ChainKey::Eth => "https://eth.llamarpc.com",
        }
    }

    pub fn default_max_block_range(&self) -> u64 {
        match self {
            ChainKey::Nova => 5,
            ChainKey::One | ChainKey::Eth => 100,
        }
    }

    pub fn default_poll_interval_secs(&self) -> u64 {
        match self {
            ChainKey::Nova | ChainKey::One => 20,
            ChainKey::Eth => 60,
        }
    }

    /// Holder column carrying this chain's balance.
    pub fn balance_column(&self) -> &'static str {
        match self {
            ChainKey::Nova => "balance_nova",
            ChainKey::One => "balance_one",
            ChainKey::Eth => "balance_eth",
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ChainKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nova" | "arbitrum nova" => Ok(ChainKey::Nova),
            "one" | "arbitrum one" | "arbitrum" => Ok(ChainKey::One),
            "eth" | "ethereum" | "mainnet" => Ok(ChainKey::Eth),
            other => Err(format!("unknown chain '{}', expected nova, one or eth", other)),
        }
    }
}
