//! Call-tree model and its canonical serialized shape.
//!
//! A [`Trace`] is the forest of top-level frames produced by one simulation.
//! Field names are part of the wire format consumed by renderers:
//!
//! ```text
//! [{ "OnEnter": {..}, "OpCodes": [..], "Children": [..], "OnExit": {..} | null }]
//! ```

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered top-level call frames of one execution.
pub type Trace = Vec<CallFrame>;

/// How a frame was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "CALLCODE")]
    CallCode,
    #[serde(rename = "DELEGATECALL")]
    DelegateCall,
    #[serde(rename = "STATICCALL")]
    StaticCall,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "CREATE2")]
    Create2,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Call => "CALL",
            CallKind::CallCode => "CALLCODE",
            CallKind::DelegateCall => "DELEGATECALL",
            CallKind::StaticCall => "STATICCALL",
            CallKind::Create => "CREATE",
            CallKind::Create2 => "CREATE2",
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, CallKind::Create | CallKind::Create2)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields recorded when a frame is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnterInfo {
    pub depth: usize,
    #[serde(rename = "Type")]
    pub call_type: CallKind,
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub gas: u64,
    pub value: U256,
}

/// Fields recorded when a frame exits. Written once per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExitInfo {
    pub depth: usize,
    pub output: Bytes,
    /// Gas consumed; the whole allowance when the frame halted.
    pub gas_used: u64,
    /// Why the frame failed. Faults are reported here, not on the
    /// instruction that caused them.
    #[serde(rename = "Err")]
    pub error: Option<String>,
    pub reverted: bool,
}

/// Execution context of the frame an instruction ran in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScopeData {
    pub caller: Address,
    pub address: Address,
    pub call_value: U256,
    pub call_input: Bytes,
}

/// One executed instruction.
///
/// `stack` is top-of-stack first. `memory` holds 32-byte words, each
/// prefixed with its byte offset (`0x0040: ...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstructionEvent {
    #[serde(rename = "PC")]
    pub pc: u64,
    #[serde(rename = "OpCode")]
    pub opcode: String,
    pub gas: u64,
    pub cost: u64,
    #[serde(rename = "RData")]
    pub return_data: Bytes,
    pub depth: usize,
    /// Always `None` from the revm engine; see [`ExitInfo::error`].
    #[serde(rename = "Err")]
    pub error: Option<String>,
    pub stack: Vec<String>,
    pub memory: Vec<String>,
    #[serde(rename = "ScopeData")]
    pub scope: ScopeData,
}

/// A node of the call tree. Owns its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    #[serde(rename = "OnEnter")]
    pub enter: EnterInfo,
    #[serde(rename = "OpCodes", default)]
    pub opcodes: Vec<InstructionEvent>,
    #[serde(rename = "Children", default)]
    pub children: Vec<CallFrame>,
    /// `None` while the frame is open, or if execution stopped inside it.
    #[serde(rename = "OnExit", default)]
    pub exit: Option<ExitInfo>,
}

impl CallFrame {
    pub fn new(enter: EnterInfo) -> Self {
        Self {
            enter,
            opcodes: Vec::new(),
            children: Vec::new(),
            exit: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.exit.is_some()
    }

    pub fn is_reverted(&self) -> bool {
        self.exit.as_ref().is_some_and(|e| e.reverted)
    }

    /// This frame plus all of its descendants.
    pub fn frame_count(&self) -> usize {
        1 + count_frames(&self.children)
    }

    /// True if this frame and every descendant has exited.
    pub fn is_fully_sealed(&self) -> bool {
        self.is_sealed() && self.children.iter().all(CallFrame::is_fully_sealed)
    }
}

/// Total number of frames in a forest.
pub fn count_frames(frames: &[CallFrame]) -> usize {
    frames.iter().map(CallFrame::frame_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(call_type: CallKind) -> CallFrame {
        CallFrame::new(EnterInfo {
            depth: 0,
            call_type,
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            input: Bytes::from_static(&[0xab, 0xcd, 0xef]),
            gas: 100_000,
            value: U256::ZERO,
        })
    }

    #[test]
    fn wire_field_names() {
        let mut f = frame(CallKind::DelegateCall);
        f.exit = Some(ExitInfo {
            depth: 0,
            output: Bytes::new(),
            gas_used: 21,
            error: None,
            reverted: false,
        });
        let json = serde_json::to_value(vec![f]).unwrap();
        let node = &json[0];
        assert_eq!(node["OnEnter"]["Type"], "DELEGATECALL");
        assert_eq!(node["OnEnter"]["Input"], "0xabcdef");
        assert_eq!(node["OnExit"]["GasUsed"], 21);
        assert!(node["OnExit"]["Err"].is_null());
        assert!(node["Children"].as_array().unwrap().is_empty());
        assert!(node["OpCodes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn open_frame_serializes_null_exit() {
        let json = serde_json::to_value(frame(CallKind::Call)).unwrap();
        assert!(json["OnExit"].is_null());
        let back: CallFrame = serde_json::from_value(json).unwrap();
        assert!(!back.is_sealed());
    }

    #[test]
    fn counts_nested_frames() {
        let mut root = frame(CallKind::Call);
        let mut mid = frame(CallKind::StaticCall);
        mid.children.push(frame(CallKind::Call));
        root.children.push(mid);
        root.children.push(frame(CallKind::Create));
        assert_eq!(root.frame_count(), 4);
        assert_eq!(count_frames(&[root.clone(), root]), 8);
    }
}
