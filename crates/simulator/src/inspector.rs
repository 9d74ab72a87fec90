//! revm `Inspector` that forwards execution events to [`ExecutionHooks`].
//!
//! revm reports calls and creates through `call`/`create` and their `_end`
//! counterparts, and instructions through `step`/`step_end`. This adapter
//! keeps its own frame stack to compute depths and to hold each frame's
//! resolved call input, mirroring how the engine nests frames.

use crate::tracer::{ExecutionHooks, OpcodeScope, OpcodeStep};
use alloy_primitives::{Address, Bytes, U256};
use retrace_core::CallKind;
use revm::context::ContextTr;
use revm::inspector::Inspector;
use revm::interpreter::interpreter::EthInterpreter;
use revm::interpreter::{interpreter_types::*, Interpreter};
use revm::interpreter::{
    CallInputs, CallOutcome, CallScheme, CreateInputs, CreateOutcome, CreateScheme,
    InterpreterResult,
};
use smallvec::SmallVec;

/// Enter event of a create frame, held until the new address is known.
#[derive(Debug)]
struct DeferredEnter {
    call_type: CallKind,
    from: Address,
    gas: u64,
    value: U256,
}

#[derive(Debug)]
struct Frame {
    input: Bytes,
    /// Gas handed to the frame; all of it is consumed on a halt.
    gas_limit: u64,
    deferred: Option<DeferredEnter>,
}

/// Pre-execution state of the instruction being stepped.
#[derive(Debug)]
struct PendingStep {
    pc: u64,
    opcode: u8,
    gas: u64,
    stack: Vec<U256>,
    memory: Vec<u8>,
    return_data: Bytes,
    caller: Address,
    address: Address,
    call_value: U256,
}

/// Adapts revm's inspector callbacks to the three execution hooks.
pub struct HookInspector<'a, H: ?Sized> {
    hooks: &'a mut H,
    frames: SmallVec<[Frame; 8]>,
    pending: Option<PendingStep>,
}

impl<'a, H> HookInspector<'a, H>
where
    H: ExecutionHooks + ?Sized,
{
    pub fn new(hooks: &'a mut H) -> Self {
        Self {
            hooks,
            frames: SmallVec::new(),
            pending: None,
        }
    }

    /// Depth of the innermost open frame (0 for the transaction itself).
    #[inline]
    fn current_depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn enter(
        &mut self,
        call_type: CallKind,
        from: Address,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) {
        let depth = self.frames.len();
        self.hooks
            .on_enter(depth, call_type, from, to, &input, gas, value);
        self.frames.push(Frame {
            input,
            gas_limit: gas,
            deferred: None,
        });
    }

    /// Emits a create frame's enter event once its address is known.
    fn flush_deferred(&mut self, address: Address) {
        let depth = self.current_depth();
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if let Some(d) = frame.deferred.take() {
            self.hooks
                .on_enter(depth, d.call_type, d.from, address, &frame.input, d.gas, d.value);
        }
    }

    fn exit(&mut self, result: &InterpreterResult) {
        self.pending = None;
        let depth = self.current_depth();
        let reverted = !result.is_ok();
        let error = reverted.then(|| format!("{:?}", result.result));
        // revm zeroes the gas of a halted frame; report what it burned.
        let gas_used = match self.frames.last() {
            Some(frame) if result.result.is_error() => frame.gas_limit,
            _ => result.gas.spent(),
        };
        self.hooks.on_exit(
            depth,
            &result.output,
            gas_used,
            error.as_deref(),
            reverted,
        );
        self.frames.pop();
    }
}

fn call_kind(scheme: CallScheme) -> CallKind {
    match scheme {
        CallScheme::Call => CallKind::Call,
        CallScheme::CallCode => CallKind::CallCode,
        CallScheme::DelegateCall => CallKind::DelegateCall,
        CallScheme::StaticCall => CallKind::StaticCall,
    }
}

fn create_kind(scheme: CreateScheme) -> CallKind {
    match scheme {
        CreateScheme::Create2 { .. } => CallKind::Create2,
        _ => CallKind::Create,
    }
}

impl<CTX, H> Inspector<CTX, EthInterpreter> for HookInspector<'_, H>
where
    CTX: ContextTr,
    H: ExecutionHooks + ?Sized,
{
    fn step(&mut self, interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX) {
        // First instruction of a create frame: the new address is now known.
        if self.frames.last().is_some_and(|f| f.deferred.is_some()) {
            self.flush_deferred(interp.input.target_address());
        }

        self.pending = Some(PendingStep {
            pc: interp.bytecode.pc() as u64,
            opcode: interp.bytecode.opcode(),
            gas: interp.gas.remaining(),
            stack: interp.stack.data().to_vec(),
            memory: interp.memory.context_memory().to_vec(),
            return_data: interp.return_data.buffer().clone(),
            caller: interp.input.caller_address(),
            address: interp.input.target_address(),
            call_value: interp.input.call_value(),
        });
    }

    fn step_end(&mut self, interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let depth = self.current_depth();
        let call_input = self.frames.last().map_or(&[][..], |f| f.input.as_ref());

        self.hooks.on_opcode(&OpcodeStep {
            pc: pending.pc,
            opcode: pending.opcode,
            gas: pending.gas,
            cost: pending.gas.saturating_sub(interp.gas.remaining()),
            scope: OpcodeScope {
                stack: &pending.stack,
                memory: &pending.memory,
                caller: pending.caller,
                address: pending.address,
                call_value: pending.call_value,
                call_input,
            },
            return_data: &pending.return_data,
            depth,
            error: None,
        });
    }

    fn call(&mut self, context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        let input = inputs.input.bytes(context);
        let (from, to) = match inputs.scheme {
            // revm keeps the parent's caller for DELEGATECALL; the frame
            // making the call is the storage context.
            CallScheme::DelegateCall => (inputs.target_address, inputs.bytecode_address),
            CallScheme::CallCode => (inputs.caller, inputs.bytecode_address),
            CallScheme::Call | CallScheme::StaticCall => (inputs.caller, inputs.target_address),
        };
        self.enter(
            call_kind(inputs.scheme),
            from,
            to,
            input,
            inputs.gas_limit,
            inputs.value.get(),
        );
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        self.exit(&outcome.result);
    }

    fn create(&mut self, _context: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.frames.push(Frame {
            input: inputs.init_code().clone(),
            gas_limit: inputs.gas_limit(),
            deferred: Some(DeferredEnter {
                call_type: create_kind(inputs.scheme()),
                from: inputs.caller(),
                gas: inputs.gas_limit(),
                value: inputs.value(),
            }),
        });
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        // Creates that fail before executing never reach `step`.
        self.flush_deferred(outcome.address.unwrap_or_default());
        self.exit(&outcome.result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::CallTreeTracer;

    #[test]
    fn new_inspector_has_no_frames() {
        let mut tracer = CallTreeTracer::new();
        let inspector = HookInspector::new(&mut tracer);
        assert_eq!(inspector.current_depth(), 0);
        assert!(inspector.frames.is_empty());
        assert!(inspector.pending.is_none());
    }

    #[test]
    fn schemes_map_to_call_kinds() {
        assert_eq!(call_kind(CallScheme::StaticCall), CallKind::StaticCall);
        assert_eq!(call_kind(CallScheme::DelegateCall), CallKind::DelegateCall);
        assert_eq!(create_kind(CreateScheme::Create), CallKind::Create);
        assert_eq!(
            create_kind(CreateScheme::Create2 { salt: U256::from(1) }),
            CallKind::Create2
        );
    }
}
