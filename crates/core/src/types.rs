//! Domain types for the retrace simulator.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Blocks subtracted from a transaction's block before simulating, so the
/// state we read is old enough not to be reorged away.
pub const REORG_SAFETY_MARGIN: u64 = 128;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What to simulate: a mined transaction on a given chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub chain_id: u64,
    pub tx_hash: B256,
}

impl SimulationRequest {
    pub fn new(chain_id: u64, tx_hash: B256) -> Self {
        Self { chain_id, tx_hash }
    }
}

// ---------------------------------------------------------------------------
// Block selection
// ---------------------------------------------------------------------------

/// Block a state query is pinned to.
///
/// Only strictly positive block numbers are representable as `Number`;
/// everything else collapses to `Latest`, so a malformed or zero block is
/// never sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockSelector {
    Number(u64),
    #[default]
    Latest,
}

impl BlockSelector {
    pub fn number(n: u64) -> Self {
        if n == 0 {
            BlockSelector::Latest
        } else {
            BlockSelector::Number(n)
        }
    }

    /// `block - margin`, or `Latest` when that would not be positive.
    pub fn below(block: u64, margin: u64) -> Self {
        block.checked_sub(margin).map_or(BlockSelector::Latest, Self::number)
    }

    /// Parses a hex block identifier. Anything that is not a positive hex
    /// integer (with or without `0x`) yields `Latest`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return BlockSelector::Latest;
        }
        u64::from_str_radix(digits, 16).map_or(BlockSelector::Latest, Self::number)
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            BlockSelector::Number(n) if *n > 0 => Some(*n),
            _ => None,
        }
    }
}

impl FromStr for BlockSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_number() {
            Some(n) => write!(f, "{n:#x}"),
            None => f.write_str("latest"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hydration state
// ---------------------------------------------------------------------------

/// Where a hydrated value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSource {
    /// Provided by the caller up front.
    Supplied,
    /// Already present in the local state snapshot.
    Snapshot,
    /// Fetched from the chain data provider.
    Remote,
}

/// Resolution state of one account fact.
///
/// `Unresolved` means hydration has not run yet. An empty `Known` value is a
/// real answer (e.g. an account with no code), not a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Hydrated<T> {
    #[default]
    Unresolved,
    /// The hydration rule decided no value is needed; the engine keeps
    /// whatever the snapshot holds.
    NotRequired,
    Known { value: T, source: StateSource },
}

impl<T> Hydrated<T> {
    pub fn known(value: T, source: StateSource) -> Self {
        Hydrated::Known { value, source }
    }

    pub fn supplied(value: T) -> Self {
        Self::known(value, StateSource::Supplied)
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Hydrated::Unresolved)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Hydrated::Known { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<StateSource> {
        match self {
            Hydrated::Known { source, .. } => Some(*source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved simulation
// ---------------------------------------------------------------------------

/// Concrete parameters of one simulation run, built from a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSimulation {
    pub tx_hash: B256,
    pub sender: Address,
    /// `None` for contract creation.
    pub recipient: Option<Address>,
    pub block: BlockSelector,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub input: Bytes,
    pub code: Hydrated<Bytes>,
    pub starting_balance: Hydrated<U256>,
    pub chain_id: u64,
}

impl ResolvedSimulation {
    pub fn is_create(&self) -> bool {
        self.recipient.is_none()
    }

    /// True once neither code nor balance is still waiting on hydration.
    pub fn is_fully_resolved(&self) -> bool {
        !self.code.is_unresolved() && !self.starting_balance.is_unresolved()
    }
}

/// Extra state installed on top of the snapshot before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOverrides {
    pub codes: HashMap<Address, Bytes>,
    pub balances: HashMap<Address, U256>,
    pub storage: HashMap<Address, HashMap<U256, U256>>,
}

impl StateOverrides {
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.balances.is_empty() && self.storage.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of a successful simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub gas_used: u64,
    /// Gas limit the engine actually ran with (estimate or original).
    pub gas_limit: u64,
    pub returned_data: Bytes,
    /// Serialized call tree, see [`crate::trace`].
    pub trace: Bytes,
}
