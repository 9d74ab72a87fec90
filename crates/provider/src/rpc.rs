//! JSON-RPC chain data client backed by alloy-rs.

use crate::{config, ChainDataClient, RemoteTransaction};
use alloy_eips::BlockId;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::network::TransactionBuilder;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_transport::{RpcError, TransportError};
use async_trait::async_trait;
use retrace_core::error::{TracerError, TracerResult};
use retrace_core::BlockSelector;

/// Fetches chain data from an Ethereum JSON-RPC endpoint over HTTP.
///
/// ```ignore
/// let client = RpcClient::connect("http://127.0.0.1:8545")?;
/// let code = client.get_code(addr, BlockSelector::parse("0x10")).await?;
/// ```
pub struct RpcClient {
    provider: DynProvider,
    rpc_url: String,
}

impl RpcClient {
    pub fn connect(rpc_url: &str) -> TracerResult<Self> {
        let url = config::parse_endpoint(rpc_url)?;
        let provider = ProviderBuilder::new().connect_http(url);

        tracing::info!(rpc_url, "connected");

        Ok(Self {
            provider: provider.erased(),
            rpc_url: rpc_url.to_string(),
        })
    }

    /// Connects to the default endpoint registered for `chain_id`.
    pub fn for_chain(chain_id: u64) -> TracerResult<Self> {
        Self::connect(config::default_rpc_url(chain_id)?)
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Returns the underlying `DynProvider`.
    pub fn into_provider(self) -> DynProvider {
        self.provider
    }
}

/// Wire block id for a selector. Non-positive numbers never leave as numbers.
pub(crate) fn block_id(block: BlockSelector) -> BlockId {
    match block.as_number() {
        Some(n) => BlockId::number(n),
        None => BlockId::latest(),
    }
}

/// Splits alloy transport errors into decode failures and everything else.
fn map_rpc_error(method: &'static str, err: TransportError) -> TracerError {
    match err {
        e @ (RpcError::DeserError { .. } | RpcError::SerError(_)) => {
            TracerError::Decode(format!("{method}: {e}"))
        }
        e => TracerError::Remote(format!("{method}: {e}")),
    }
}

#[async_trait]
impl ChainDataClient for RpcClient {
    async fn get_code(&self, address: Address, block: BlockSelector) -> TracerResult<Bytes> {
        tracing::debug!(%address, %block, rpc_url = %self.rpc_url, "eth_getCode");
        self.provider
            .get_code_at(address)
            .block_id(block_id(block))
            .await
            .map_err(|e| map_rpc_error("eth_getCode", e))
    }

    async fn get_balance(&self, address: Address, block: BlockSelector) -> TracerResult<U256> {
        tracing::debug!(%address, %block, rpc_url = %self.rpc_url, "eth_getBalance");
        self.provider
            .get_balance(address)
            .block_id(block_id(block))
            .await
            .map_err(|e| map_rpc_error("eth_getBalance", e))
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockSelector,
    ) -> TracerResult<B256> {
        tracing::debug!(%address, %slot, %block, "eth_getStorageAt");
        let value = self
            .provider
            .get_storage_at(address, slot)
            .block_id(block_id(block))
            .await
            .map_err(|e| map_rpc_error("eth_getStorageAt", e))?;
        Ok(B256::from(value))
    }

    async fn get_transaction(&self, hash: B256) -> TracerResult<Option<RemoteTransaction>> {
        use alloy_consensus::transaction::Transaction as TxTrait;

        tracing::debug!(%hash, rpc_url = %self.rpc_url, "eth_getTransactionByHash");

        let Some(tx) = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| map_rpc_error("eth_getTransactionByHash", e))?
        else {
            return Ok(None);
        };

        // Legacy txs carry gasPrice; 1559 txs report what was actually paid.
        let gas_price = tx
            .effective_gas_price
            .or_else(|| tx.gas_price())
            .unwrap_or_else(|| tx.max_fee_per_gas());

        Ok(Some(RemoteTransaction {
            hash: *tx.inner.tx_hash(),
            from: tx.inner.signer(),
            to: tx.to(),
            block_number: tx.block_number,
            gas: tx.gas_limit(),
            gas_price: U256::from(gas_price),
            value: tx.value(),
            input: tx.input().clone(),
        }))
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Bytes,
    ) -> TracerResult<u64> {
        tracing::debug!(%from, ?to, %value, "eth_estimateGas");

        let request = TransactionRequest::default()
            .from(from)
            .value(value)
            .input(data.into());
        let request = match to {
            Some(to) => request.to(to),
            None => request.into_create(),
        };

        self.provider
            .estimate_gas(request)
            .await
            .map_err(|e| map_rpc_error("eth_estimateGas", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_eips::BlockNumberOrTag;

    #[test]
    fn zero_and_garbage_blocks_go_out_as_latest() {
        for raw in ["0x0", "not-hex", "", "0x"] {
            assert_eq!(
                block_id(BlockSelector::parse(raw)),
                BlockId::Number(BlockNumberOrTag::Latest),
                "input {raw:?}"
            );
        }
        // Constructed directly, bypassing parse.
        assert_eq!(
            block_id(BlockSelector::Number(0)),
            BlockId::Number(BlockNumberOrTag::Latest)
        );
    }

    #[test]
    fn hex_block_goes_out_as_number() {
        assert_eq!(
            block_id(BlockSelector::parse("0x10")),
            BlockId::Number(BlockNumberOrTag::Number(16))
        );
    }

    #[test]
    fn connect_rejects_empty_url() {
        assert!(matches!(
            RpcClient::connect(""),
            Err(TracerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn connect_accepts_http_url() {
        let client = RpcClient::connect("http://127.0.0.1:8545").unwrap();
        assert_eq!(client.rpc_url(), "http://127.0.0.1:8545");
    }
}
