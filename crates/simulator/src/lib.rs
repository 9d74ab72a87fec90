//! Transaction replay: call-tree tracer, revm engine, orchestrator and
//! plain-text reporter.

pub mod engine;
pub mod inspector;
pub mod orchestrator;
pub mod reporter;
pub mod tracer;

pub use engine::{
    EngineConfig, EngineError, ExecutionEngine, ExecutionOutput, ExecutionRequest, RevmEngine,
};
pub use inspector::HookInspector;
pub use orchestrator::{Simulator, SimulatorConfig};
pub use reporter::render_trace;
pub use tracer::{CallTreeTracer, ExecutionHooks, OpcodeScope, OpcodeStep};
