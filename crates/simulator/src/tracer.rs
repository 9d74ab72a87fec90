//! Hook-driven call-tree builder.
//!
//! The execution engine drives three hooks in program order: `on_enter` when
//! a call or create starts, `on_opcode` before each instruction completes,
//! `on_exit` when the frame returns. [`CallTreeTracer`] turns that linear
//! stream into a nested [`Trace`].
//!
//! Frames live in an index arena and the open-frame stack holds indices, so
//! a hook never walks the tree. Nesting follows call-stack order only: the
//! `depth` arguments are recorded as metadata and never used for routing. An
//! engine that emits events out of stack order produces a misattributed
//! tree; that is not detected.

use alloy_primitives::{Address, Bytes, U256};
use retrace_core::error::{TracerError, TracerResult};
use retrace_core::{
    CallFrame, CallKind, EnterInfo, ExitInfo, InstructionEvent, ScopeData, Trace,
};
use revm::bytecode::opcode::OpCode;
use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

/// Memory is reported in words of this many bytes.
const MEMORY_WORD: usize = 32;

// ---------------------------------------------------------------------------
// Hook interface
// ---------------------------------------------------------------------------

/// Frame context of an executing instruction, as the engine sees it.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeScope<'a> {
    /// Bottom of the stack first.
    pub stack: &'a [U256],
    pub memory: &'a [u8],
    pub caller: Address,
    pub address: Address,
    pub call_value: U256,
    pub call_input: &'a [u8],
}

/// One instruction reported to [`ExecutionHooks::on_opcode`].
#[derive(Debug, Clone, Copy)]
pub struct OpcodeStep<'a> {
    pub pc: u64,
    pub opcode: u8,
    /// Gas remaining before the instruction.
    pub gas: u64,
    pub cost: u64,
    pub scope: OpcodeScope<'a>,
    pub return_data: &'a [u8],
    pub depth: usize,
    pub error: Option<&'a str>,
}

/// Callbacks an execution engine invokes synchronously while it runs.
///
/// Implementations must not block: hooks sit on the engine's hot path.
pub trait ExecutionHooks {
    #[allow(clippy::too_many_arguments)]
    fn on_enter(
        &mut self,
        depth: usize,
        call_type: CallKind,
        from: Address,
        to: Address,
        input: &[u8],
        gas: u64,
        value: U256,
    );

    fn on_opcode(&mut self, step: &OpcodeStep<'_>);

    fn on_exit(
        &mut self,
        depth: usize,
        output: &[u8],
        gas_used: u64,
        error: Option<&str>,
        reverted: bool,
    );
}

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    enter: EnterInfo,
    opcodes: Vec<InstructionEvent>,
    children: Vec<usize>,
    exit: Option<ExitInfo>,
}

/// Builds the call tree from engine hooks and owns its serialized form.
///
/// ```ignore
/// let mut tracer = CallTreeTracer::new();
/// let outcome = engine.execute(&request, &snapshot, &mut tracer);
/// tracer.seal()?;
/// let trace_bytes = tracer.reload();
/// ```
#[derive(Debug, Default)]
pub struct CallTreeTracer {
    nodes: Vec<Node>,
    roots: Vec<usize>,
    open: SmallVec<[usize; 16]>,
    serialized: Bytes,
    reloaded: Option<Trace>,
}

impl CallTreeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames recorded, open or sealed.
    pub fn frame_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of frames still waiting for their exit.
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// Serialized snapshot from the last [`seal`](Self::seal); empty before
    /// sealing or after a failed [`reload`](Self::reload).
    pub fn serialized(&self) -> &Bytes {
        &self.serialized
    }

    /// Tree parsed back by the last successful [`reload`](Self::reload).
    pub fn trace(&self) -> Option<&Trace> {
        self.reloaded.as_ref()
    }

    /// Owned copy of the tree as recorded so far. Open frames have no exit.
    pub fn to_trace(&self) -> Trace {
        self.roots.iter().map(|&i| self.materialize(i)).collect()
    }

    /// Serializes the current forest and stores it as the snapshot.
    ///
    /// Open frames are included with a null `OnExit`, so a run that failed
    /// midway still yields its partial tree. Calling this again without new
    /// events produces identical bytes.
    pub fn seal(&mut self) -> TracerResult<()> {
        let bytes = serde_json::to_vec_pretty(&ForestView { tracer: self })
            .map_err(|e| TracerError::Internal(format!("failed to serialize trace: {e}")))?;

        tracing::debug!(
            frames = self.nodes.len(),
            open = self.open.len(),
            bytes = bytes.len(),
            "trace sealed"
        );

        self.serialized = Bytes::from(bytes);
        Ok(())
    }

    /// Parses the stored snapshot back into a tree as a well-formedness
    /// check. Returns the bytes on success. On failure the snapshot is
    /// discarded and `None` is returned.
    pub fn reload(&mut self) -> Option<Bytes> {
        if self.serialized.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Trace>(&self.serialized) {
            Ok(trace) => {
                self.reloaded = Some(trace);
                Some(self.serialized.clone())
            }
            Err(e) => {
                tracing::warn!(error = %e, "serialized trace failed to reload, discarding");
                self.serialized = Bytes::new();
                self.reloaded = None;
                None
            }
        }
    }

    fn materialize(&self, index: usize) -> CallFrame {
        let node = &self.nodes[index];
        CallFrame {
            enter: node.enter.clone(),
            opcodes: node.opcodes.clone(),
            children: node.children.iter().map(|&c| self.materialize(c)).collect(),
            exit: node.exit.clone(),
        }
    }

    #[inline]
    fn top(&mut self) -> Option<&mut Node> {
        let index = *self.open.last()?;
        self.nodes.get_mut(index)
    }
}

impl ExecutionHooks for CallTreeTracer {
    fn on_enter(
        &mut self,
        depth: usize,
        call_type: CallKind,
        from: Address,
        to: Address,
        input: &[u8],
        gas: u64,
        value: U256,
    ) {
        let index = self.nodes.len();
        self.nodes.push(Node {
            enter: EnterInfo {
                depth,
                call_type,
                from,
                to,
                input: Bytes::copy_from_slice(input),
                gas,
                value,
            },
            opcodes: Vec::new(),
            children: Vec::new(),
            exit: None,
        });

        match self.open.last() {
            Some(&parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        self.open.push(index);
    }

    fn on_opcode(&mut self, step: &OpcodeStep<'_>) {
        let Some(frame) = self.top() else {
            tracing::trace!(pc = step.pc, opcode = step.opcode, "opcode outside any frame, dropped");
            return;
        };
        frame.opcodes.push(instruction_event(step));
    }

    fn on_exit(
        &mut self,
        depth: usize,
        output: &[u8],
        gas_used: u64,
        error: Option<&str>,
        reverted: bool,
    ) {
        let Some(index) = self.open.pop() else {
            tracing::trace!(depth, "exit without open frame, ignored");
            return;
        };
        self.nodes[index].exit = Some(ExitInfo {
            depth,
            output: Bytes::copy_from_slice(output),
            gas_used,
            error: error.map(str::to_string),
            reverted,
        });
    }
}

// ---------------------------------------------------------------------------
// Instruction formatting
// ---------------------------------------------------------------------------

fn instruction_event(step: &OpcodeStep<'_>) -> InstructionEvent {
    InstructionEvent {
        pc: step.pc,
        opcode: mnemonic(step.opcode),
        gas: step.gas,
        cost: step.cost,
        return_data: Bytes::copy_from_slice(step.return_data),
        depth: step.depth,
        error: step.error.map(str::to_string),
        stack: stack_top_first(step.scope.stack),
        memory: memory_words(step.scope.memory),
        scope: ScopeData {
            caller: step.scope.caller,
            address: step.scope.address,
            call_value: step.scope.call_value,
            call_input: Bytes::copy_from_slice(step.scope.call_input),
        },
    }
}

/// Opcode mnemonic, or its hex byte when unassigned.
pub fn mnemonic(opcode: u8) -> String {
    OpCode::new(opcode).map_or_else(|| format!("0x{opcode:02x}"), |op| op.as_str().to_string())
}

/// Stack words as hex, top of stack at index 0.
pub fn stack_top_first(stack: &[U256]) -> Vec<String> {
    stack.iter().rev().map(|word| format!("{word:#x}")).collect()
}

/// Memory as 32-byte words labelled with their byte offset. A trailing
/// partial word is emitted as-is.
pub fn memory_words(memory: &[u8]) -> Vec<String> {
    memory
        .chunks(MEMORY_WORD)
        .enumerate()
        .map(|(i, word)| format!("0x{:04x}: {}", i * MEMORY_WORD, hex::encode(word)))
        .collect()
}

// ---------------------------------------------------------------------------
// Serialization straight from the arena
// ---------------------------------------------------------------------------

// Serializes the same shape as `Vec<CallFrame>` without cloning the arena.

struct ForestView<'a> {
    tracer: &'a CallTreeTracer,
}

struct FrameView<'a> {
    tracer: &'a CallTreeTracer,
    index: usize,
}

struct ChildrenView<'a> {
    tracer: &'a CallTreeTracer,
    children: &'a [usize],
}

impl Serialize for ForestView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ChildrenView {
            tracer: self.tracer,
            children: &self.tracer.roots,
        }
        .serialize(serializer)
    }
}

impl Serialize for ChildrenView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.children.len()))?;
        for &index in self.children {
            seq.serialize_element(&FrameView {
                tracer: self.tracer,
                index,
            })?;
        }
        seq.end()
    }
}

impl Serialize for FrameView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = &self.tracer.nodes[self.index];
        let mut frame = serializer.serialize_struct("CallFrame", 4)?;
        frame.serialize_field("OnEnter", &node.enter)?;
        frame.serialize_field("OpCodes", &node.opcodes)?;
        frame.serialize_field(
            "Children",
            &ChildrenView {
                tracer: self.tracer,
                children: &node.children,
            },
        )?;
        frame.serialize_field("OnExit", &node.exit)?;
        frame.end()
    }
}
