//! Timeline row — one per (asset, book-affecting event) touched by a run
//! (spec.md §3, and Open Question (b) in DESIGN.md).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineRow {
    pub seq: u64,
    pub ts_recv: f64,
    pub asset_id: String,
    pub event_type: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}
