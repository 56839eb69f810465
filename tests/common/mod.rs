#![allow(dead_code)]

//! Scripted in-memory chain for integration tests: pools, balances,
//! allowances and per-hop quote rates are set up front, emitted swaps are
//! injected by hand, and every write is recorded for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use dexpulse::chain::{
    BatchKind, BatchSwapParams, ChainClient, RawSwap, SwapCall, SwapReceipt,
};
use dexpulse::error::EngineError;

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

fn sorted(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Default)]
pub struct MockChain {
    pub signer: Address,
    pools: Mutex<HashMap<(Address, Address), Address>>,
    pair_tokens: Mutex<HashMap<Address, (Address, Address)>>,
    decimals: Mutex<HashMap<Address, u8>>,
    symbols: Mutex<HashMap<Address, String>>,
    balances: Mutex<HashMap<Address, U256>>,
    native_balance: Mutex<U256>,
    allowances: Mutex<HashMap<(Address, Address), U256>>,
    /// Per-hop quote rate as (numerator, denominator).
    rates: Mutex<HashMap<(Address, Address), (U256, U256)>>,
    timestamps: Mutex<HashMap<u64, u64>>,
    timestamp_lookups: AtomicUsize,
    swap_subscribers: Mutex<HashMap<Address, Vec<mpsc::UnboundedSender<RawSwap>>>>,
    pair_waiters: Mutex<HashMap<(Address, Address), Vec<mpsc::UnboundedSender<Address>>>>,
    pub gas_estimate: u64,
    pub gas_price_wei: u128,
    fail_next_send: AtomicBool,

    pub approvals: Mutex<Vec<(Address, Address)>>,
    pub sent_swaps: Mutex<Vec<SwapCall>>,
    pub sent_batches: Mutex<Vec<(BatchKind, BatchSwapParams)>>,
    pub sent_transfers: Mutex<Vec<(Address, Vec<Address>, Vec<U256>)>>,
    pub unwraps: Mutex<Vec<U256>>,
    pub native_transfers: Mutex<Vec<(Address, U256)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            signer: addr(0xAA),
            gas_estimate: 100_000,
            gas_price_wei: 10,
            ..Default::default()
        }
    }

    pub fn add_token(&self, token: Address, decimals: u8, symbol: &str) {
        self.decimals.lock().unwrap().insert(token, decimals);
        self.symbols.lock().unwrap().insert(token, symbol.to_string());
    }

    pub fn add_pool(&self, token_a: Address, token_b: Address, pool: Address) {
        let key = sorted(token_a, token_b);
        self.pools.lock().unwrap().insert(key, pool);
        self.pair_tokens.lock().unwrap().insert(pool, key);
    }

    /// Registers the pool and wakes everything waiting on its creation.
    pub fn create_pair(&self, token_a: Address, token_b: Address, pool: Address) {
        self.add_pool(token_a, token_b, pool);
        let key = sorted(token_a, token_b);
        if let Some(waiters) = self.pair_waiters.lock().unwrap().remove(&key) {
            for waiter in waiters {
                let _ = waiter.send(pool);
            }
        }
    }

    pub fn set_balance(&self, token: Address, amount: U256) {
        self.balances.lock().unwrap().insert(token, amount);
    }

    pub fn set_native_balance(&self, amount: U256) {
        *self.native_balance.lock().unwrap() = amount;
    }

    pub fn set_allowance(&self, token: Address, spender: Address, amount: U256) {
        self.allowances.lock().unwrap().insert((token, spender), amount);
    }

    /// Quote rate for one hop: `out = in * num / den`.
    pub fn set_rate(&self, from: Address, to: Address, num: u64, den: u64) {
        self.rates
            .lock()
            .unwrap()
            .insert((from, to), (U256::from(num), U256::from(den)));
    }

    pub fn set_timestamp(&self, block_number: u64, timestamp: u64) {
        self.timestamps.lock().unwrap().insert(block_number, timestamp);
    }

    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Number of `block_timestamp` calls this mock has served.
    pub fn timestamp_lookup_count(&self) -> usize {
        self.timestamp_lookups.load(Ordering::SeqCst)
    }

    pub fn swap_subscriber_count(&self, pool: Address) -> usize {
        self.swap_subscribers
            .lock()
            .unwrap()
            .get(&pool)
            .map_or(0, |subs| subs.iter().filter(|s| !s.is_closed()).count())
    }

    /// Delivers a raw swap to every live subscriber of `pool`.
    pub fn emit_swap(&self, pool: Address, raw: RawSwap) {
        let mut subscribers = self.swap_subscribers.lock().unwrap();
        if let Some(subs) = subscribers.get_mut(&pool) {
            subs.retain(|s| s.send(raw.clone()).is_ok());
        }
    }

    fn receipt(&self) -> SwapReceipt {
        let success = !self.fail_next_send.swap(false, Ordering::SeqCst);
        SwapReceipt {
            transaction_hash: B256::repeat_byte(0x11),
            block_number: Some(1),
            gas_used: 21_000,
            success,
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn pool_address(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<Option<Address>, EngineError> {
        Ok(self.pools.lock().unwrap().get(&sorted(token_a, token_b)).copied())
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), EngineError> {
        self.pair_tokens
            .lock()
            .unwrap()
            .get(&pool)
            .copied()
            .ok_or_else(|| EngineError::Chain(format!("unknown pool {pool}")))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, EngineError> {
        self.decimals
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .ok_or_else(|| EngineError::Chain(format!("unknown token {token}")))
    }

    async fn token_symbol(&self, token: Address) -> Result<String, EngineError> {
        self.symbols
            .lock()
            .unwrap()
            .get(&token)
            .cloned()
            .ok_or_else(|| EngineError::Chain(format!("unknown token {token}")))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, EngineError> {
        self.timestamp_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .timestamps
            .lock()
            .unwrap()
            .get(&block_number)
            .copied()
            .unwrap_or(block_number))
    }

    async fn amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, EngineError> {
        let rates = self.rates.lock().unwrap();
        let mut amounts = vec![amount_in];
        for hop in path.windows(2) {
            let (num, den) = rates
                .get(&(hop[0], hop[1]))
                .ok_or_else(|| EngineError::Chain(format!("no quote for hop {:?}", hop)))?;
            let last = *amounts.last().unwrap();
            amounts.push(last * num / den);
        }
        Ok(amounts)
    }

    async fn subscribe_swaps(
        &self,
        pool: Address,
    ) -> Result<mpsc::UnboundedReceiver<RawSwap>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.swap_subscribers
            .lock()
            .unwrap()
            .entry(pool)
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn subscribe_pair_created(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<Address>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pair_waiters
            .lock()
            .unwrap()
            .entry(sorted(token_a, token_b))
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn balance_of(&self, token: Address, _owner: Address) -> Result<U256, EngineError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn native_balance(&self, _owner: Address) -> Result<U256, EngineError> {
        Ok(*self.native_balance.lock().unwrap())
    }

    async fn allowance(
        &self,
        token: Address,
        _owner: Address,
        spender: Address,
    ) -> Result<U256, EngineError> {
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(token, spender))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn approve_max(&self, token: Address, spender: Address) -> Result<(), EngineError> {
        self.approvals.lock().unwrap().push((token, spender));
        self.allowances
            .lock()
            .unwrap()
            .insert((token, spender), U256::MAX);
        Ok(())
    }

    async fn estimate_swap_gas(&self, _call: &SwapCall) -> Result<u64, EngineError> {
        Ok(self.gas_estimate)
    }

    async fn gas_price(&self) -> Result<u128, EngineError> {
        Ok(self.gas_price_wei)
    }

    async fn send_swap(&self, call: SwapCall) -> Result<SwapReceipt, EngineError> {
        self.sent_swaps.lock().unwrap().push(call);
        Ok(self.receipt())
    }

    async fn send_batch(
        &self,
        kind: BatchKind,
        params: BatchSwapParams,
    ) -> Result<SwapReceipt, EngineError> {
        self.sent_batches.lock().unwrap().push((kind, params));
        Ok(self.receipt())
    }

    async fn send_batch_transfer(
        &self,
        token: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<SwapReceipt, EngineError> {
        self.sent_transfers
            .lock()
            .unwrap()
            .push((token, recipients, amounts));
        Ok(self.receipt())
    }

    async fn unwrap_native(&self, amount: U256) -> Result<(), EngineError> {
        self.unwraps.lock().unwrap().push(amount);
        Ok(())
    }

    async fn transfer_native(&self, to: Address, amount: U256) -> Result<(), EngineError> {
        self.native_transfers.lock().unwrap().push((to, amount));
        Ok(())
    }
}

/// Engine config wired to the mock's fixed addresses.
pub fn test_config() -> dexpulse::EngineConfig {
    use rust_decimal_macros::dec;

    dexpulse::EngineConfig {
        network: "testnet".to_string(),
        rpc_http_url: "http://localhost:8545".to_string(),
        poll_interval_ms: 10,
        default_slippage: dec!(0.001),
        addresses: dexpulse::AddressBook {
            router: addr(0xD0),
            factory: addr(0xFA),
            wrapped_native: WRAPPED,
            base_asset: WRAPPED,
            batch_swapper: BATCH_SWAPPER,
        },
    }
}

pub const WRAPPED: Address = Address::repeat_byte(0xEE);
pub const BATCH_SWAPPER: Address = Address::repeat_byte(0xBB);
