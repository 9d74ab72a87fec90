//! Chain data access, local snapshot helpers, and state hydration for retrace.

pub mod config;
pub mod hydrator;
pub mod rpc;
pub mod snapshot;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use retrace_core::{BlockSelector, TracerResult};

pub use hydrator::{Hydration, Hydrator};
pub use rpc::RpcClient;
pub use snapshot::LocalSnapshot;

/// A mined transaction as reported by the chain data provider, with every
/// hex wire field decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// `None` while the transaction is pending.
    pub block_number: Option<u64>,
    pub gas: u64,
    pub gas_price: U256,
    pub value: U256,
    pub input: Bytes,
}

/// Typed request/response access to a remote chain data source.
///
/// Transport failures surface as `TracerError::Remote`, malformed responses
/// as `TracerError::Decode`. Nothing is retried.
#[async_trait]
pub trait ChainDataClient: Send + Sync {
    async fn get_code(&self, address: Address, block: BlockSelector) -> TracerResult<Bytes>;

    async fn get_balance(&self, address: Address, block: BlockSelector) -> TracerResult<U256>;

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockSelector,
    ) -> TracerResult<B256>;

    /// `Ok(None)` when the provider does not know the hash.
    async fn get_transaction(&self, hash: B256) -> TracerResult<Option<RemoteTransaction>>;

    async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Bytes,
    ) -> TracerResult<u64>;
}
