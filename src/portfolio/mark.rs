//! Mark-to-market valuation methods (spec.md §4.H).
//!
//! `mark.py`'s module itself was not in the retrieved reference pack —
//! only its `MARK_BID` constant name, imported by `shadow/runner.py`. The
//! two methods below are built directly from spec.md's prose.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkMethod {
    /// Conservative: long positions mark at `best_bid`, shorts at
    /// `best_ask`.
    Bid,
    /// Both long and short mark at `(best_bid + best_ask) / 2`.
    Midpoint,
}

pub const MARK_BID: MarkMethod = MarkMethod::Bid;
pub const MARK_MIDPOINT: MarkMethod = MarkMethod::Midpoint;

impl MarkMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkMethod::Bid => "bid",
            MarkMethod::Midpoint => "midpoint",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bid" => Some(MarkMethod::Bid),
            "midpoint" => Some(MarkMethod::Midpoint),
            _ => None,
        }
    }
}
