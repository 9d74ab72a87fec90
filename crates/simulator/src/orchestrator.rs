//! Simulation orchestrator.
//!
//! Pipeline: resolve tx -> hydrate state -> estimate gas -> execute with
//! tracer -> seal trace.

use crate::engine::{
    EngineConfig, ExecutionEngine, ExecutionRequest, DEFAULT_BASE_FEE, DEFAULT_BLOCK_TIMESTAMP,
};
use crate::tracer::CallTreeTracer;
use alloy_primitives::{Address, Bytes, U256};
use retrace_core::error::{TracerError, TracerResult};
use retrace_core::{
    BlockSelector, Hydrated, ResolvedSimulation, SimulationRequest, SimulationResult,
    StateOverrides, REORG_SAFETY_MARGIN,
};
use retrace_provider::{ChainDataClient, Hydrator, LocalSnapshot};

/// Tunables for a [`Simulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Blocks subtracted from the transaction's block before replaying.
    pub reorg_safety_margin: u64,
    pub block_timestamp: u64,
    pub base_fee: u64,
    /// Ask the engine for extra diagnostics.
    pub debug: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            reorg_safety_margin: REORG_SAFETY_MARGIN,
            block_timestamp: DEFAULT_BLOCK_TIMESTAMP,
            base_fee: DEFAULT_BASE_FEE,
            debug: true,
        }
    }
}

/// Replays mined transactions and returns their call trees.
///
/// ```ignore
/// let sim = Simulator::new(RpcClient::for_chain(1)?, RevmEngine);
/// let result = sim
///     .simulate(SimulationRequest::new(1, tx_hash), &snapshot::empty(), None)
///     .await?;
/// ```
pub struct Simulator<C, E> {
    client: C,
    engine: E,
    config: SimulatorConfig,
}

impl<C, E> Simulator<C, E>
where
    C: ChainDataClient,
    E: ExecutionEngine,
{
    pub fn new(client: C, engine: E) -> Self {
        Self {
            client,
            engine,
            config: SimulatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SimulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Looks the transaction up and turns it into simulation parameters.
    /// Code and starting balance are left unresolved.
    pub async fn resolve(&self, request: &SimulationRequest) -> TracerResult<ResolvedSimulation> {
        let tx = self
            .client
            .get_transaction(request.tx_hash)
            .await?
            .ok_or(TracerError::TransactionNotFound(request.tx_hash))?;

        let block = tx.block_number.map_or(BlockSelector::Latest, |n| {
            BlockSelector::below(n, self.config.reorg_safety_margin)
        });

        tracing::info!(
            tx_hash = %tx.hash,
            from = %tx.from,
            to = ?tx.to,
            tx_block = ?tx.block_number,
            %block,
            "transaction resolved"
        );

        Ok(ResolvedSimulation {
            tx_hash: tx.hash,
            sender: tx.from,
            recipient: tx.to,
            block,
            gas_limit: tx.gas,
            gas_price: tx.gas_price,
            value: tx.value,
            input: tx.input,
            code: Hydrated::Unresolved,
            starting_balance: Hydrated::Unresolved,
            chain_id: request.chain_id,
        })
    }

    /// Resolves, hydrates and executes `request` against `snapshot`.
    pub async fn simulate(
        &self,
        request: SimulationRequest,
        snapshot: &LocalSnapshot,
        overrides: Option<&StateOverrides>,
    ) -> TracerResult<SimulationResult> {
        let sim = self.resolve(&request).await?;
        self.simulate_resolved(sim, snapshot, overrides).await
    }

    /// Like [`Simulator::simulate`], but first reads `slots` from the chain at
    /// the replay block and installs them as storage overrides on top of
    /// `overrides`.
    pub async fn simulate_with_storage(
        &self,
        request: SimulationRequest,
        snapshot: &LocalSnapshot,
        slots: &[(Address, U256)],
        mut overrides: StateOverrides,
    ) -> TracerResult<SimulationResult> {
        let sim = self.resolve(&request).await?;
        Hydrator::new(&self.client, snapshot)
            .hydrate_storage(&sim, slots, &mut overrides)
            .await?;
        self.simulate_resolved(sim, snapshot, Some(&overrides)).await
    }

    /// Runs an already resolved simulation. Fields that are still
    /// `Unresolved` are hydrated first; supplied ones are kept.
    ///
    /// On engine failure the error carries whatever trace was recorded.
    pub async fn simulate_resolved(
        &self,
        mut sim: ResolvedSimulation,
        snapshot: &LocalSnapshot,
        overrides: Option<&StateOverrides>,
    ) -> TracerResult<SimulationResult> {
        Hydrator::new(&self.client, snapshot)
            .hydrate(&sim)
            .await?
            .apply(&mut sim);

        let gas_limit = self.gas_limit(&sim).await;

        if !sim.is_fully_resolved() {
            return Err(TracerError::Internal(format!(
                "simulation {} reached execution with unresolved state",
                sim.tx_hash
            )));
        }

        let request = ExecutionRequest {
            recipient: sim.recipient,
            starting_balance: sim.starting_balance.value().copied(),
            code: sim.code.value(),
            input: &sim.input,
            config: EngineConfig {
                debug: self.config.debug,
                origin: sim.sender,
                block_number: sim.block.as_number(),
                gas_limit,
                gas_price: sim.gas_price,
                value: sim.value,
                chain_id: sim.chain_id,
                timestamp: self.config.block_timestamp,
                base_fee: self.config.base_fee,
            },
            overrides,
        };

        let mut tracer = CallTreeTracer::new();
        let outcome = self.engine.execute(&request, snapshot, &mut tracer);
        // Seal before looking at the outcome so failures keep their trace.
        let trace = seal_trace(&mut tracer);

        match outcome {
            Ok(out) => {
                tracing::info!(
                    tx_hash = %sim.tx_hash,
                    gas_used = out.gas_used,
                    gas_limit,
                    frames = tracer.frame_count(),
                    "simulation complete"
                );
                Ok(SimulationResult {
                    gas_used: out.gas_used,
                    gas_limit,
                    returned_data: out.returned_data,
                    trace: trace.unwrap_or_default(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    tx_hash = %sim.tx_hash,
                    error = %e,
                    frames = tracer.frame_count(),
                    "simulation failed"
                );
                Err(TracerError::Execution {
                    reason: e.to_string(),
                    trace,
                })
            }
        }
    }

    /// Remote estimate if available, otherwise the transaction's own limit.
    async fn gas_limit(&self, sim: &ResolvedSimulation) -> u64 {
        match self
            .client
            .estimate_gas(sim.sender, sim.recipient, sim.value, sim.input.clone())
            .await
        {
            Ok(gas) => {
                tracing::debug!(tx_hash = %sim.tx_hash, estimate = gas, "gas estimated");
                gas
            }
            Err(e) => {
                tracing::warn!(
                    tx_hash = %sim.tx_hash,
                    error = %e,
                    fallback = sim.gas_limit,
                    "gas estimation failed, using transaction gas limit"
                );
                sim.gas_limit
            }
        }
    }
}

/// Seals and reloads; `None` when the trace could not be produced.
fn seal_trace(tracer: &mut CallTreeTracer) -> Option<Bytes> {
    if let Err(e) = tracer.seal() {
        tracing::warn!(error = %e, "trace could not be sealed");
        return None;
    }
    let trace = tracer.reload();
    if trace.is_none() {
        tracing::warn!("sealed trace did not reload");
    }
    trace
}
