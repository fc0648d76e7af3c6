//! DEX pools trading MOON, per chain.

use alloy::primitives::{address, b256, Address, B256};
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;

use crate::{
    config::{DexVersion, PoolSettings, TokenSettings},
    db::models::ChainKey,
    utils::parse_address,
};

const MOON_SYMBOL: &str = "MOON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLeg {
    pub symbol: String,
    pub decimals: u8,
}

impl TokenLeg {
    pub fn new(symbol: &str, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
        }
    }
}

impl From<&TokenSettings> for TokenLeg {
    fn from(settings: &TokenSettings) -> Self {
        Self::new(&settings.symbol, settings.decimals)
    }
}

/// The two tokens of a pool, in pool order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPair {
    pub token0: TokenLeg,
    pub token1: TokenLeg,
}

impl PoolPair {
    pub fn new(token0: TokenLeg, token1: TokenLeg) -> Self {
        Self { token0, token1 }
    }

    /// Index of the MOON leg, `None` if neither side is MOON.
    pub fn moon_index(&self) -> Option<usize> {
        if self.token0.symbol.eq_ignore_ascii_case(MOON_SYMBOL) {
            Some(0)
        } else if self.token1.symbol.eq_ignore_ascii_case(MOON_SYMBOL) {
            Some(1)
        } else {
            None
        }
    }

    pub fn leg(&self, index: usize) -> &TokenLeg {
        if index == 0 {
            &self.token0
        } else {
            &self.token1
        }
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolLayout {
    /// V2 pair or V3 pool: one contract, one token pair.
    Pair(PoolPair),
    /// V4 pool manager: swaps for many pools, told apart by pool id.
    Manager(FxHashMap<B256, PoolPair>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexPool {
    pub dex: String,
    pub version: DexVersion,
    pub address: Address,
    pub layout: PoolLayout,
}

impl DexPool {
    /// Token pair for a swap, looked up by pool id on V4 managers.
    /// Unknown V4 ids yield `None`.
    pub fn pair_for(&self, pool_id: Option<B256>) -> Option<&PoolPair> {
        match (&self.layout, pool_id) {
            (PoolLayout::Pair(pair), _) => Some(pair),
            (PoolLayout::Manager(pools), Some(id)) => pools.get(&id),
            (PoolLayout::Manager(_), None) => None,
        }
    }

    /// Pool ids watched on a V4 manager, sorted for a stable filter.
    pub fn pool_ids(&self) -> Vec<B256> {
        match &self.layout {
            PoolLayout::Pair(_) => Vec::new(),
            PoolLayout::Manager(pools) => {
                let mut ids: Vec<B256> = pools.keys().copied().collect();
                ids.sort();
                ids
            },
        }
    }

    pub fn from_settings(settings: &PoolSettings) -> anyhow::Result<Self> {
        let address = parse_address(&settings.address)?;

        let layout = match settings.version {
            DexVersion::V2 | DexVersion::V3 => {
                let (Some(token0), Some(token1)) = (&settings.token0, &settings.token1) else {
                    bail!("Pool {} needs token0 and token1", settings.dex);
                };
                PoolLayout::Pair(PoolPair::new(token0.into(), token1.into()))
            },
            DexVersion::V4 => {
                if settings.pools.is_empty() {
                    bail!("Pool manager {} lists no pools", settings.dex);
                }
                let mut pools = FxHashMap::default();
                for pool in &settings.pools {
                    let id: B256 = pool
                        .id
                        .parse()
                        .with_context(|| format!("Invalid V4 pool id {} ({})", pool.id, pool.name))?;
                    pools.insert(id, PoolPair::new((&pool.token0).into(), (&pool.token1).into()));
                }
                PoolLayout::Manager(pools)
            },
        };

        Ok(Self {
            dex: settings.dex.clone(),
            version: settings.version,
            address,
            layout,
        })
    }

    /// Configured pools when present, otherwise the known deployments.
    pub fn for_chain(
        chain: ChainKey,
        configured: Option<&[PoolSettings]>,
    ) -> anyhow::Result<Vec<Self>> {
        match configured {
            Some(pools) => pools.iter().map(Self::from_settings).collect(),
            None => Ok(builtin_pools(chain)),
        }
    }
}

/// Known MOON liquidity on each chain.
pub fn builtin_pools(chain: ChainKey) -> Vec<DexPool> {
    let moon = || TokenLeg::new(MOON_SYMBOL, 18);
    let eth = || TokenLeg::new("ETH", 18);
    let usdc = || TokenLeg::new("USDC", 6);

    match chain {
        ChainKey::Nova => vec![DexPool {
            dex: "SushiSwap V2 (Nova)".to_string(),
            version: DexVersion::V2,
            address: address!("d6c821b282531868721b41badca1f1ce471f43c5"),
            layout: PoolLayout::Pair(PoolPair::new(moon(), eth())),
        }],
        ChainKey::One => {
            let mut v4 = FxHashMap::default();
            v4.insert(
                b256!("065144c11d71d908594e6305b7ae834d00443374f87cc82692fbac8ed81af56a"),
                PoolPair::new(moon(), usdc()),
            );
            v4.insert(
                b256!("a14aaa23a3b1ae4b0bdc031151c6814f1d06a901ffc5f8ab6951c75de2bc2c17"),
                PoolPair::new(moon(), eth()),
            );

            vec![
                DexPool {
                    dex: "Camelot V3 (One)".to_string(),
                    version: DexVersion::V3,
                    address: address!("5e27a422ec06a57567a843fd65a1bbb06ac19fc0"),
                    layout: PoolLayout::Pair(PoolPair::new(moon(), eth())),
                },
                DexPool {
                    dex: "Uniswap V3 (One)".to_string(),
                    version: DexVersion::V3,
                    address: address!("285b461B3d233ab24C665E9FbAF5B96352E3ED07"),
                    layout: PoolLayout::Pair(PoolPair::new(moon(), usdc())),
                },
                DexPool {
                    dex: "Uniswap V4 (One)".to_string(),
                    version: DexVersion::V4,
                    address: address!("360E68faCcca8cA495c1B759Fd9EEe466db9FB32"),
                    layout: PoolLayout::Manager(v4),
                },
            ]
        },
        ChainKey::Eth => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        assert_eq!(builtin_pools(ChainKey::Nova).len(), 1);
        assert!(builtin_pools(ChainKey::Eth).is_empty());

        let one = builtin_pools(ChainKey::One);
        let uniswap = one.iter().find(|p| p.dex == "Uniswap V3 (One)").unwrap();
        let pair = uniswap.pair_for(None).unwrap();
        assert_eq!(pair.moon_index(), Some(0));
        assert_eq!(pair.token1.decimals, 6);

        let manager = one.iter().find(|p| p.version == DexVersion::V4).unwrap();
        assert_eq!(manager.pool_ids().len(), 2);
        assert!(manager.pair_for(None).is_none());
        assert!(manager.pair_for(Some(B256::ZERO)).is_none());
        let usdc_id = b256!("065144c11d71d908594e6305b7ae834d00443374f87cc82692fbac8ed81af56a");
        assert_eq!(manager.pair_for(Some(usdc_id)).unwrap().name(), "MOON/USDC");
    }

    #[test]
    fn test_from_settings_requires_tokens() {
        let mut settings = PoolSettings {
            dex: "Test V2".to_string(),
            version: DexVersion::V2,
            address: "0xd6c821b282531868721b41badca1f1ce471f43c5".to_string(),
            token0: Some(TokenSettings {
                symbol: "WETH".to_string(),
                decimals: 18,
            }),
            token1: None,
            pools: Vec::new(),
        };
        assert!(DexPool::from_settings(&settings).is_err());

        settings.token1 = Some(TokenSettings {
            symbol: "MOON".to_string(),
            decimals: 18,
        });
        let pool = DexPool::from_settings(&settings).unwrap();
        assert_eq!(pool.pair_for(None).unwrap().moon_index(), Some(1));
    }
}
