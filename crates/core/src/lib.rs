//! Domain models, trace format, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod error;
pub mod trace;
pub mod types;

pub use error::{TracerError, TracerResult};
pub use trace::{count_frames, CallFrame, CallKind, EnterInfo, ExitInfo, InstructionEvent, ScopeData, Trace};
pub use types::{
    BlockSelector, Hydrated, ResolvedSimulation, SimulationRequest, SimulationResult,
    StateOverrides, StateSource, REORG_SAFETY_MARGIN,
};
