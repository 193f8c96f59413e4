//! Trace correlation ids.
//!
//! A task gets a 128-bit trace id when it is created; every committed step
//! and every tool call gets its own 64-bit span id. Both use the W3C
//! lowercase-hex widths so external exporters can consume them unchanged.

use uuid::Uuid;

/// 32 lowercase hex chars.
pub fn new_trace_id() -> String {
    format_trace_id(Uuid::new_v4().as_u128())
}

/// 16 lowercase hex chars.
pub fn new_span_id() -> String {
    let (high, _) = Uuid::new_v4().as_u64_pair();
    format_span_id(high)
}

pub fn format_trace_id(trace_id: u128) -> String {
    format!("{:032x}", trace_id)
}

pub fn format_span_id(span_id: u64) -> String {
    format!("{:016x}", span_id)
}
