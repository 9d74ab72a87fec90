//! Plain-text call tree renderer.
//!
//! One line per frame, children indented two spaces per level:
//!
//! ```text
//! CALL 0xaa..aa -> 0xbb..bb value=0 input=0xabcdef => ok gas_used=21000
//!   STATICCALL 0xbb..bb -> 0xcc..cc value=0 input=0x => reverted gas_used=24 (Revert)
//! ```

use retrace_core::{CallFrame, Trace};

/// Inputs longer than this are shown as selector plus length.
const MAX_INPUT_BYTES: usize = 32;

/// Render every top-level frame of `trace` and its descendants.
pub fn render_trace(trace: &Trace) -> String {
    let mut out = String::new();
    for frame in trace {
        render_frame(frame, 0, &mut out);
    }
    out
}

fn render_frame(frame: &CallFrame, level: usize, out: &mut String) {
    let enter = &frame.enter;
    out.push_str(&"  ".repeat(level));
    out.push_str(&format!(
        "{} {} -> {} value={} input={} => {}\n",
        enter.call_type,
        enter.from,
        enter.to,
        enter.value,
        input_summary(&enter.input),
        exit_summary(frame),
    ));
    for child in &frame.children {
        render_frame(child, level + 1, out);
    }
}

fn input_summary(input: &[u8]) -> String {
    if input.len() <= MAX_INPUT_BYTES {
        return format!("0x{}", hex::encode(input));
    }
    format!("0x{}..({} bytes)", hex::encode(&input[..4]), input.len())
}

fn exit_summary(frame: &CallFrame) -> String {
    let Some(exit) = &frame.exit else {
        return "unfinished".to_string();
    };
    let status = if exit.reverted { "reverted" } else { "ok" };
    match &exit.error {
        Some(err) => format!("{status} gas_used={} ({err})", exit.gas_used),
        None => format!("{status} gas_used={}", exit.gas_used),
    }
}
