//! Scripted chain and sink doubles shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use alloy::{
    primitives::{aliases::U160, Address, B256, I256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use async_trait::async_trait;

use crate::{
    abis::{Transfer, V2Swap, V3Swap, V4Swap},
    db::{models::ChainKey, MemoryStore},
    notify::Notifier,
    rpc::{ChainRpc, LogQuery, ProviderPool, RetryPolicy, RpcError},
    worker::ChainContext,
};

pub(crate) fn address_of(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

pub(crate) fn hash_of(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

pub(crate) fn moon(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

pub(crate) fn signed(value: &str) -> I256 {
    value.parse().unwrap()
}

pub(crate) fn event_log<E: SolEvent>(
    address: Address,
    event: &E,
    block: u64,
    tx: u64,
    log_index: u64,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block),
        transaction_hash: Some(hash_of(tx)),
        log_index: Some(log_index),
        ..Default::default()
    }
}

pub(crate) fn transfer_log(
    token: Address,
    from: Address,
    to: Address,
    value: U256,
    block: u64,
    tx: u64,
    log_index: u64,
) -> Log {
    event_log(token, &Transfer { from, to, value }, block, tx, log_index)
}

pub(crate) fn v2_swap_log(
    pool: Address,
    sender: Address,
    amounts: [U256; 4],
    block: u64,
    tx: u64,
) -> Log {
    let event = V2Swap {
        sender,
        amount0In: amounts[0],
        amount1In: amounts[1],
        amount0Out: amounts[2],
        amount1Out: amounts[3],
        to: sender,
    };
    event_log(pool, &event, block, tx, 0)
}

pub(crate) fn v3_swap_log(
    pool: Address,
    sender: Address,
    amount0: I256,
    amount1: I256,
    block: u64,
    tx: u64,
) -> Log {
    let event = V3Swap {
        sender,
        recipient: sender,
        amount0,
        amount1,
        sqrtPriceX96: U160::ZERO,
        liquidity: 0,
        tick: Default::default(),
    };
    event_log(pool, &event, block, tx, 0)
}

pub(crate) fn v4_swap_log(
    manager: Address,
    id: B256,
    sender: Address,
    amount0: i128,
    amount1: i128,
    block: u64,
    tx: u64,
) -> Log {
    let event = V4Swap {
        id,
        sender,
        amount0,
        amount1,
        sqrtPriceX96: U160::ZERO,
        liquidity: 0,
        tick: Default::default(),
        fee: Default::default(),
    };
    event_log(manager, &event, block, tx, 0)
}

#[derive(Default)]
struct Script {
    head: u64,
    effective_range: Option<u64>,
    failures: VecDeque<RpcError>,
    log_failures: VecDeque<RpcError>,
    persistent: Option<RpcError>,
    logs: Vec<Log>,
    balances: HashMap<Address, U256>,
    senders: HashMap<B256, Address>,
    attempted: Vec<(u64, u64)>,
    fetched: Vec<(u64, u64)>,
    attempts: usize,
}

/// In-memory endpoint serving a fixed set of logs with scripted failures.
pub(crate) struct ScriptedRpc {
    name: String,
    max_block_range: u64,
    script: Mutex<Script>,
}

impl ScriptedRpc {
    pub(crate) fn new(name: &str, max_block_range: u64) -> Self {
        Self {
            name: name.to_string(),
            max_block_range,
            script: Mutex::new(Script::default()),
        }
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.script.lock().unwrap().head = head;
    }

    /// Reject `eth_getLogs` spans wider than `range` blocks.
    pub(crate) fn set_effective_range(&self, range: u64) {
        self.script.lock().unwrap().effective_range = Some(range);
    }

    /// Fail the next call of any method.
    pub(crate) fn fail_next(&self, err: RpcError) {
        self.script.lock().unwrap().failures.push_back(err);
    }

    /// Fail the next `eth_getLogs` call.
    pub(crate) fn fail_logs_next(&self, err: RpcError) {
        self.script.lock().unwrap().log_failures.push_back(err);
    }

    pub(crate) fn fail_always(&self, err: RpcError) {
        self.script.lock().unwrap().persistent = Some(err);
    }

    pub(crate) fn recover(&self) {
        let mut script = self.script.lock().unwrap();
        script.persistent = None;
        script.failures.clear();
        script.log_failures.clear();
    }

    pub(crate) fn add_logs(&self, logs: Vec<Log>) {
        self.script.lock().unwrap().logs.extend(logs);
    }

    pub(crate) fn set_balance(&self, holder: Address, balance: U256) {
        self.script.lock().unwrap().balances.insert(holder, balance);
    }

    pub(crate) fn set_sender(&self, tx: B256, sender: Address) {
        self.script.lock().unwrap().senders.insert(tx, sender);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }

    /// Every `eth_getLogs` window requested, failed or not.
    pub(crate) fn attempted_ranges(&self) -> Vec<(u64, u64)> {
        self.script.lock().unwrap().attempted.clone()
    }

    /// `eth_getLogs` windows that were served.
    pub(crate) fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        self.script.lock().unwrap().fetched.clone()
    }

    pub(crate) fn clear_fetches(&self) {
        let mut script = self.script.lock().unwrap();
        script.fetched.clear();
        script.attempted.clear();
    }

    fn take_failure(script: &mut Script) -> Option<RpcError> {
        script.attempts += 1;
        if let Some(err) = &script.persistent {
            return Some(err.clone());
        }
        script.failures.pop_front()
    }
}

#[async_trait]
impl ChainRpc for ScriptedRpc {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let mut script = self.script.lock().unwrap();
        match Self::take_failure(&mut script) {
            Some(err) => Err(err),
            None => Ok(script.head),
        }
    }

    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let mut script = self.script.lock().unwrap();
        script.attempted.push((from_block, to_block));
        if let Some(err) = Self::take_failure(&mut script) {
            return Err(err);
        }
        if let Some(err) = script.log_failures.pop_front() {
            return Err(err);
        }

        let span = to_block - from_block + 1;
        let limit = script.effective_range.unwrap_or(self.max_block_range);
        if span > limit {
            return Err(RpcError::RangeTooLarge(format!(
                "block range {} exceeds limit of {}",
                span, limit
            )));
        }

        script.fetched.push((from_block, to_block));
        Ok(script
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                block >= from_block && block <= to_block && query.matches(log)
            })
            .cloned()
            .collect())
    }

    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>, RpcError> {
        let mut script = self.script.lock().unwrap();
        match Self::take_failure(&mut script) {
            Some(err) => Err(err),
            None => Ok(script.senders.get(&hash).copied()),
        }
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, RpcError> {
        let mut script = self.script.lock().unwrap();
        match Self::take_failure(&mut script) {
            Some(err) => Err(err),
            None => Ok(Some(1_700_000_000 + block * 12)),
        }
    }

    async fn balance_of(&self, _token: Address, holder: Address) -> Result<U256, RpcError> {
        let mut script = self.script.lock().unwrap();
        match Self::take_failure(&mut script) {
            Some(err) => Err(err),
            None => Ok(script.balances.get(&holder).copied().unwrap_or_default()),
        }
    }
}

/// Keeps every alert it is asked to send.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// A chain wired to scripted providers, an in-memory store and a recording notifier.
pub(crate) struct TestChain {
    pub ctx: Arc<ChainContext>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) fn test_chain(chain: ChainKey, providers: Vec<Arc<ScriptedRpc>>) -> TestChain {
    test_chain_with_store(chain, providers, Arc::new(MemoryStore::new()))
}

pub(crate) fn test_chain_with_store(
    chain: ChainKey,
    providers: Vec<Arc<ScriptedRpc>>,
    store: Arc<MemoryStore>,
) -> TestChain {
    let notifier = Arc::new(RecordingNotifier::default());
    let pool = ProviderPool::new(
        chain,
        providers.into_iter().map(|p| p as Arc<dyn ChainRpc>).collect(),
        RetryPolicy::immediate(),
    );
    let ctx = Arc::new(ChainContext::new(
        chain,
        chain.default_token_address(),
        chain.default_explorer_url().to_string(),
        pool,
        store.clone(),
        notifier.clone(),
    ));

    TestChain {
        ctx,
        store,
        notifier,
    }
}
