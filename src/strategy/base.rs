//! Strategy interface (spec.md §4.I).
//!
//! An explicit generalization of the teacher's single-method `Strategy`
//! trait in `strategies/mod.rs` (`fn evaluate(&self, state: &MarketState,
//! now_ms: i64) -> Option<Signal>`) into the four-operation capability set
//! spec.md §9 calls for, replacing dynamic dispatch/duck typing with a
//! fixed trait.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::book::Side;
use crate::broker::{FillRecord, Order};

/// Non-terminal order snapshot handed to `on_event`. Strategies never see
/// the broker's internal `Order` directly — only this read-only view.
pub type OpenOrders = HashMap<String, Order>;

/// Context passed to `on_event`: the raw event plus a best-bid/best-ask
/// snapshot for every asset touched so far, and the set of currently open
/// orders.
pub struct EventContext<'a> {
    pub event: &'a serde_json::Map<String, Value>,
    pub seq: u64,
    pub ts_recv: f64,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_by_asset: &'a HashMap<String, (Option<Decimal>, Option<Decimal>)>,
    pub open_orders: &'a OpenOrders,
}

/// A tagged intent a strategy returns from `on_event`. The runner
/// validates required fields and logs+skips malformed intents rather than
/// panicking (spec.md §4.I, §7's `strategy_malformed_intent` policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OrderIntent {
    Submit {
        asset_id: String,
        side: Side,
        limit_price: Decimal,
        size: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    Cancel {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
}

/// A diagnostic opportunity row a strategy may optionally report; carried
/// through to `opportunities.jsonl` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub seq: u64,
    pub ts_recv: f64,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// The four-operation strategy contract. Implementations must be pure
/// with respect to external state: given the same tape and config, every
/// output must be byte-identical across runs (spec.md §4.I).
pub trait Strategy {
    fn on_start(&mut self, primary_asset_id: &str, starting_cash: Decimal);

    fn on_event(&mut self, ctx: &EventContext<'_>) -> Vec<OrderIntent>;

    fn on_fill(&mut self, fill: &FillRecord);

    fn on_finish(&mut self);

    /// Diagnostic rows harvested by the runner at the end of a run, if
    /// any. Default: none.
    fn opportunities(&self) -> Vec<Opportunity> {
        Vec::new()
    }

    /// Optional per-strategy debug counters surfaced in `run_manifest.json`.
    fn rejection_counts(&self) -> HashMap<String, u64> {
        HashMap::new()
    }
}

/// A strategy that never trades — used by tests and as a baseline for
/// pure book-replay runs.
pub struct NullStrategy;

impl Strategy for NullStrategy {
    fn on_start(&mut self, _primary_asset_id: &str, _starting_cash: Decimal) {}
    fn on_event(&mut self, _ctx: &EventContext<'_>) -> Vec<OrderIntent> {
        Vec::new()
    }
    fn on_fill(&mut self, _fill: &FillRecord) {}
    fn on_finish(&mut self) {}
}
