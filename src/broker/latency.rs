//! Event-tick latency model (spec.md §4.F).
//!
//! Grounded on `broker/latency.py`. Both counts are event ticks, not
//! wall-clock — this is what makes replays deterministic.

/// Immutable submit/cancel delay, expressed in tape ticks (i.e. `seq`
/// units), not wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyConfig {
    pub submit_ticks: u64,
    pub cancel_ticks: u64,
}

/// No delay at all: orders are eligible for fills the instant they're
/// submitted, and cancels take effect immediately.
pub const ZERO_LATENCY: LatencyConfig = LatencyConfig {
    submit_ticks: 0,
    cancel_ticks: 0,
};

impl LatencyConfig {
    pub fn effective_seq(&self, submit_seq: u64) -> u64 {
        submit_seq + self.submit_ticks
    }

    pub fn cancel_effective_seq(&self, cancel_seq: u64) -> u64 {
        cancel_seq + self.cancel_ticks
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        ZERO_LATENCY
    }
}
