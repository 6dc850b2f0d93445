//! Order and fill data types (spec.md §3, §4.G).
//!
//! Grounded on `broker/rules.py`. All monetary values use `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Active,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Active => "active",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A single simulated order tracked by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub asset_id: String,
    pub side: Side,
    pub limit_price: Decimal,
    pub size: Decimal,
    pub submit_seq: u64,
    pub effective_seq: u64,
    pub cancel_effective_seq: Option<u64>,
    pub status: OrderStatus,
    pub filled_size: Decimal,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.size - self.filled_size
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Active | OrderStatus::Partial)
    }
}

/// Result of one fill evaluation against the book. `because` records the
/// exact book state used to make the decision — a full audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub order_id: String,
    pub asset_id: String,
    pub seq: u64,
    pub ts_recv: f64,
    pub side: Side,
    pub fill_price: Decimal,
    pub fill_size: Decimal,
    pub remaining: Decimal,
    pub fill_status: FillStatus,
    pub reject_reason: Option<String>,
    pub because: FillContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Full,
    Partial,
    Rejected,
}

/// Audit bundle: the book state the fill engine used to make its decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillContext {
    pub eval_seq: u64,
    pub book_best_bid: Option<Decimal>,
    pub book_best_ask: Option<Decimal>,
    pub levels_consumed: Vec<ConsumedLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumedLevel {
    pub price: Decimal,
    pub size: Decimal,
}
