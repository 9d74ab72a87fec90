//! In-memory [`ChainDataClient`] for tests, with per-method call counters.

use crate::{ChainDataClient, RemoteTransaction};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use retrace_core::error::{TracerError, TracerResult};
use retrace_core::BlockSelector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Canned chain data. Unknown accounts read as empty; a `None` estimate
/// makes `estimate_gas` fail.
#[derive(Default)]
pub struct StubClient {
    pub codes: HashMap<Address, Bytes>,
    pub balances: HashMap<Address, U256>,
    pub storage: HashMap<(Address, U256), U256>,
    pub transactions: HashMap<B256, RemoteTransaction>,
    pub gas_estimate: Option<u64>,
    pub fail_code: bool,
    pub fail_balance: bool,
    code_calls: AtomicUsize,
    balance_calls: AtomicUsize,
    storage_calls: AtomicUsize,
    transaction_calls: AtomicUsize,
    estimate_calls: AtomicUsize,
    blocks: Mutex<Vec<BlockSelector>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, tx: RemoteTransaction) -> Self {
        self.transactions.insert(tx.hash, tx);
        self
    }

    pub fn with_code(mut self, address: Address, code: Bytes) -> Self {
        self.codes.insert(address, code);
        self
    }

    pub fn with_balance(mut self, address: Address, balance: U256) -> Self {
        self.balances.insert(address, balance);
        self
    }

    pub fn with_storage(mut self, address: Address, slot: U256, value: U256) -> Self {
        self.storage.insert((address, slot), value);
        self
    }

    pub fn with_gas_estimate(mut self, gas: u64) -> Self {
        self.gas_estimate = Some(gas);
        self
    }

    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn storage_calls(&self) -> usize {
        self.storage_calls.load(Ordering::SeqCst)
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    /// Block selectors passed to state queries, in call order.
    pub fn requested_blocks(&self) -> Vec<BlockSelector> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn record_block(&self, block: BlockSelector) {
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.push(block);
        }
    }
}

#[async_trait]
impl ChainDataClient for StubClient {
    async fn get_code(&self, address: Address, block: BlockSelector) -> TracerResult<Bytes> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        self.record_block(block);
        if self.fail_code {
            return Err(TracerError::Remote("eth_getCode: connection refused".into()));
        }
        Ok(self.codes.get(&address).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, address: Address, block: BlockSelector) -> TracerResult<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.record_block(block);
        if self.fail_balance {
            return Err(TracerError::Remote("eth_getBalance: connection refused".into()));
        }
        Ok(self.balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockSelector,
    ) -> TracerResult<B256> {
        self.storage_calls.fetch_add(1, Ordering::SeqCst);
        self.record_block(block);
        let value = self.storage.get(&(address, slot)).copied().unwrap_or_default();
        Ok(B256::from(value))
    }

    async fn get_transaction(&self, hash: B256) -> TracerResult<Option<RemoteTransaction>> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _to: Option<Address>,
        _value: U256,
        _data: Bytes,
    ) -> TracerResult<u64> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.gas_estimate
            .ok_or_else(|| TracerError::Remote("eth_estimateGas: execution reverted".into()))
    }
}
