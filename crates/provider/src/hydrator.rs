//! Concurrent state hydrator.
//!
//! Fills in the recipient's code and the sender's starting balance when the
//! local snapshot does not already have them. Code and balance are hydrated
//! by two independent futures joined with `tokio::join!`; each owns its own
//! result, and the merge is fixed: a code failure is reported ahead of a
//! balance failure.
//!
//! Storage slots are not discovered automatically; callers name the slots
//! they want read and get them back as overrides.

use crate::{snapshot, ChainDataClient, LocalSnapshot};
use alloy_primitives::{Address, Bytes, U256};
use retrace_core::error::{TracerError, TracerResult};
use retrace_core::{Hydrated, ResolvedSimulation, StateOverrides, StateSource};

/// Hydrated account facts for one simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hydration {
    pub code: Hydrated<Bytes>,
    pub starting_balance: Hydrated<U256>,
}

impl Hydration {
    /// Writes the hydrated fields back into the simulation.
    pub fn apply(self, sim: &mut ResolvedSimulation) {
        sim.code = self.code;
        sim.starting_balance = self.starting_balance;
    }
}

/// Reads the snapshot first and only asks the client for what is missing.
///
/// ```ignore
/// let hydration = Hydrator::new(&client, &snapshot).hydrate(&sim).await?;
/// hydration.apply(&mut sim);
/// ```
pub struct Hydrator<'a, C: ?Sized> {
    client: &'a C,
    snapshot: &'a LocalSnapshot,
}

impl<'a, C> Hydrator<'a, C>
where
    C: ChainDataClient + ?Sized,
{
    pub fn new(client: &'a C, snapshot: &'a LocalSnapshot) -> Self {
        Self { client, snapshot }
    }

    /// Runs both hydration tasks to completion, then merges their results.
    pub async fn hydrate(&self, sim: &ResolvedSimulation) -> TracerResult<Hydration> {
        tracing::debug!(
            tx_hash = %sim.tx_hash,
            block = %sim.block,
            code_unresolved = sim.code.is_unresolved(),
            value = %sim.value,
            "hydrating state"
        );

        let (code, balance) = tokio::join!(self.hydrate_code(sim), self.hydrate_balance(sim));

        let hydration = Hydration {
            code: code?,
            starting_balance: balance?,
        };

        tracing::info!(
            tx_hash = %sim.tx_hash,
            code_source = ?hydration.code.source(),
            balance_source = ?hydration.starting_balance.source(),
            "state hydrated"
        );
        Ok(hydration)
    }

    /// Reads `slots` at the simulation block into `overrides`. Slots that are
    /// already overridden or loaded in the snapshot are left alone. Returns
    /// the number of slots fetched.
    pub async fn hydrate_storage(
        &self,
        sim: &ResolvedSimulation,
        slots: &[(Address, U256)],
        overrides: &mut StateOverrides,
    ) -> TracerResult<usize> {
        let mut fetched = 0;
        for &(address, slot) in slots {
            let overridden = overrides
                .storage
                .get(&address)
                .is_some_and(|s| s.contains_key(&slot));
            if overridden || snapshot::storage(self.snapshot, address, slot).is_some() {
                continue;
            }

            let word = self.client.get_storage_at(address, slot, sim.block).await?;
            overrides
                .storage
                .entry(address)
                .or_default()
                .insert(slot, U256::from_be_bytes(word.0));
            fetched += 1;
        }

        tracing::debug!(
            tx_hash = %sim.tx_hash,
            requested = slots.len(),
            fetched,
            "storage hydrated"
        );
        Ok(fetched)
    }

    async fn hydrate_code(&self, sim: &ResolvedSimulation) -> TracerResult<Hydrated<Bytes>> {
        if !sim.code.is_unresolved() {
            return Ok(sim.code.clone());
        }

        // Contract creation: init code travels in the input.
        let Some(recipient) = sim.recipient else {
            return Ok(Hydrated::NotRequired);
        };

        if let Some(code) = snapshot::code(self.snapshot, recipient) {
            tracing::debug!(%recipient, len = code.len(), "code found in snapshot");
            return Ok(Hydrated::known(code, StateSource::Snapshot));
        }

        let code = self.client.get_code(recipient, sim.block).await?;
        tracing::debug!(%recipient, len = code.len(), "code fetched");
        Ok(Hydrated::known(code, StateSource::Remote))
    }

    async fn hydrate_balance(&self, sim: &ResolvedSimulation) -> TracerResult<Hydrated<U256>> {
        if !sim.starting_balance.is_unresolved() {
            return Ok(sim.starting_balance.clone());
        }

        if sim.value.is_zero() {
            return Ok(Hydrated::NotRequired);
        }

        let local = snapshot::balance(self.snapshot, sim.sender);
        if local >= sim.value {
            return Ok(Hydrated::known(local, StateSource::Snapshot));
        }

        let balance = self.client.get_balance(sim.sender, sim.block).await?;
        if balance <= sim.value {
            return Err(TracerError::InsufficientBalance {
                address: sim.sender,
                balance,
                required: sim.value,
            });
        }

        tracing::debug!(sender = %sim.sender, %balance, "balance fetched");
        Ok(Hydrated::known(balance, StateSource::Remote))
    }
}
