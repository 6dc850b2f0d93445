//! Stateful single-threaded order broker (spec.md §4.G).
//!
//! Grounded on `broker/sim_broker.py`'s `SimBroker`. The three-phase
//! `step()` ordering (activate → fill → cancel) is the source of the "no
//! perfect cancels" guarantee: a fill at the same `seq` as a cancel always
//! wins, because fills are applied before cancels within one step.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::book::{L2Book, Side};
use crate::broker::fill_engine::try_fill;
use crate::broker::latency::{LatencyConfig, ZERO_LATENCY};
use crate::broker::rules::{FillRecord, Order, OrderStatus};
use crate::error::BrokerError;

/// One entry of the broker's lifecycle log. `extra` carries event-specific
/// fields (e.g. `limit_price`/`size` on `submitted`, `because` on `fill`),
/// mirroring `sim_broker.py`'s `_append_event`'s `**extra` expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event: String,
    pub order_id: String,
    pub seq: u64,
    pub ts_recv: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

pub struct SimBroker {
    latency: LatencyConfig,
    orders: HashMap<String, Order>,
    fills: Vec<FillRecord>,
    order_events: Vec<OrderEvent>,
}

impl SimBroker {
    pub fn new(latency: LatencyConfig) -> Self {
        Self {
            latency,
            orders: HashMap::new(),
            fills: Vec::new(),
            order_events: Vec::new(),
        }
    }

    pub fn fills(&self) -> &[FillRecord] {
        &self.fills
    }

    pub fn order_events(&self) -> &[OrderEvent] {
        &self.order_events
    }

    pub fn get_order(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Snapshot of every non-terminal order, keyed by order id. Strategies
    /// never see the broker's internal map — only this read-only copy
    /// (spec.md §5's "shared-resource policy").
    pub fn open_orders(&self) -> HashMap<String, Order> {
        self.orders
            .iter()
            .filter(|(_, o)| !o.status.is_terminal())
            .map(|(id, o)| (id.clone(), o.clone()))
            .collect()
    }

    /// Submit a new order. `limit_price` must be in `(0, 1]` per the
    /// binary-market bound (Open Question (a) in DESIGN.md resolves this
    /// to be enforced here, uniformly, rather than only in the on-demand
    /// session).
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &mut self,
        asset_id: impl Into<String>,
        side: Side,
        limit_price: Decimal,
        size: Decimal,
        submit_seq: u64,
        submit_ts: f64,
        order_id: Option<String>,
    ) -> Result<String, BrokerError> {
        if limit_price <= Decimal::ZERO || limit_price > Decimal::ONE {
            return Err(BrokerError::InvalidPrice(limit_price));
        }
        if size <= Decimal::ZERO {
            return Err(BrokerError::InvalidSize(size));
        }

        let asset_id = asset_id.into();
        let order_id = order_id.unwrap_or_else(|| {
            let full = uuid::Uuid::new_v4().simple().to_string();
            full[..8].to_string()
        });
        let effective_seq = self.latency.effective_seq(submit_seq);

        let order = Order {
            order_id: order_id.clone(),
            asset_id: asset_id.clone(),
            side,
            limit_price,
            size,
            submit_seq,
            effective_seq,
            cancel_effective_seq: None,
            status: OrderStatus::Pending,
            filled_size: Decimal::ZERO,
        };
        self.orders.insert(order_id.clone(), order);

        let mut extra = serde_json::Map::new();
        extra.insert("asset_id".to_string(), Value::String(asset_id));
        extra.insert("side".to_string(), Value::String(side.as_str().to_string()));
        extra.insert("limit_price".to_string(), Value::String(limit_price.to_string()));
        extra.insert("size".to_string(), Value::String(size.to_string()));
        extra.insert("effective_seq".to_string(), Value::Number(effective_seq.into()));
        self.append_event("submitted", &order_id, submit_seq, submit_ts, extra);

        Ok(order_id)
    }

    /// Request a cancel. Fails if the order doesn't exist or is already
    /// terminal.
    pub fn cancel_order(
        &mut self,
        order_id: &str,
        cancel_seq: u64,
        cancel_ts: f64,
    ) -> Result<(), BrokerError> {
        let eff_cancel = self.latency.cancel_effective_seq(cancel_seq);
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        if order.status.is_terminal() {
            return Err(BrokerError::OrderTerminal {
                order_id: order_id.to_string(),
                status: order.status.to_string(),
            });
        }
        order.cancel_effective_seq = Some(eff_cancel);
        let extra = self.asset_side_extra(order_id);
        self.append_event("cancel_submitted", order_id, cancel_seq, cancel_ts, extra);
        Ok(())
    }

    /// Advance the broker by one tape event. `fill_asset_id`, when
    /// `Some`, restricts the fill phase to orders on that asset — used by
    /// the strategy/shadow runner to step only the asset(s) touched by
    /// this event.
    ///
    /// Phase order (fixed): activate → fill → cancel. This ordering is
    /// what guarantees a fill at the same `seq` as a cancel always wins.
    pub fn step(
        &mut self,
        seq: u64,
        ts_recv: f64,
        is_book_event: bool,
        book: &L2Book,
        fill_asset_id: Option<&str>,
    ) -> Vec<FillRecord> {
        let order_ids: Vec<String> = self
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .map(|o| o.order_id.clone())
            .collect();

        let mut new_fills = Vec::new();

        for order_id in &order_ids {
            // Phase 1: activate.
            let should_activate = {
                let order = &self.orders[order_id];
                order.status == OrderStatus::Pending && seq >= order.effective_seq
            };
            if should_activate {
                self.orders.get_mut(order_id).unwrap().status = OrderStatus::Active;
                let extra = self.asset_side_extra(order_id);
                self.append_event("activated", order_id, seq, ts_recv, extra);
            }

            // Phase 2: fill.
            let eligible = {
                let order = &self.orders[order_id];
                is_book_event
                    && order.is_active()
                    && fill_asset_id.map_or(true, |a| a == order.asset_id)
            };
            if eligible {
                let fill = {
                    let order = &self.orders[order_id];
                    try_fill(order, book, seq, ts_recv)
                };
                if fill.fill_size > Decimal::ZERO {
                    let order = self.orders.get_mut(order_id).unwrap();
                    order.filled_size += fill.fill_size;
                    order.status = if order.remaining() <= Decimal::ZERO {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::Partial
                    };

                    let mut extra = self.asset_side_extra(order_id);
                    extra.insert("fill_price".to_string(), Value::String(fill.fill_price.to_string()));
                    extra.insert("fill_size".to_string(), Value::String(fill.fill_size.to_string()));
                    extra.insert("remaining".to_string(), Value::String(fill.remaining.to_string()));
                    extra.insert(
                        "fill_status".to_string(),
                        Value::String(format!("{:?}", fill.fill_status).to_lowercase()),
                    );
                    extra.insert("because".to_string(), serde_json::to_value(&fill.because).unwrap());
                    self.append_event("fill", order_id, seq, ts_recv, extra);

                    self.fills.push(fill.clone());
                    new_fills.push(fill);
                }
            }

            // Phase 3: cancel.
            let should_cancel = {
                let order = &self.orders[order_id];
                matches!(order.cancel_effective_seq, Some(ce) if seq >= ce) && !order.status.is_terminal()
            };
            if should_cancel {
                let order = self.orders.get_mut(order_id).unwrap();
                order.status = OrderStatus::Cancelled;
                let remaining = order.remaining();
                let mut extra = self.asset_side_extra(order_id);
                extra.insert("remaining".to_string(), Value::String(remaining.to_string()));
                self.append_event("cancelled", order_id, seq, ts_recv, extra);
            }
        }

        new_fills
    }

    fn asset_side_extra(&self, order_id: &str) -> serde_json::Map<String, Value> {
        let mut extra = serde_json::Map::new();
        if let Some(order) = self.orders.get(order_id) {
            extra.insert("asset_id".to_string(), Value::String(order.asset_id.clone()));
            extra.insert("side".to_string(), Value::String(order.side.as_str().to_string()));
        }
        extra
    }

    fn append_event(
        &mut self,
        event: &str,
        order_id: &str,
        seq: u64,
        ts_recv: f64,
        extra: serde_json::Map<String, Value>,
    ) {
        self.order_events.push(OrderEvent {
            event: event.to_string(),
            order_id: order_id.to_string(),
            seq,
            ts_recv,
            extra,
        });
    }
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new(ZERO_LATENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_book(bids: serde_json::Value, asks: serde_json::Value) -> L2Book {
        let mut book = L2Book::new("asset-1", true);
        let payload = json!({"bids": bids, "asks": asks}).as_object().cloned().unwrap();
        let evt = crate::tape::schema::Event {
            parser_version: 1,
            seq: 0,
            ts_recv: 0.0,
            event_type: "book".to_string(),
            asset_id: Some("asset-1".to_string()),
            payload,
        };
        book.apply(&evt).unwrap();
        book
    }

    /// Scenario (spec.md §8.4): at seq=5 a strategy submits a zero-latency
    /// cancel for an already-active order, and the book event at seq=5
    /// also yields a fill.
    /// Expected: the order ends `filled`, not `cancelled` — "no perfect
    /// cancels".
    #[test]
    fn no_perfect_cancel() {
        let mut broker = SimBroker::new(ZERO_LATENCY);
        let order_id = broker
            .submit_order("asset-1", Side::Buy, "0.50".parse().unwrap(), "10".parse().unwrap(), 0, 0.0, None)
            .unwrap();
        let empty_book = L2Book::new("asset-1", true);
        broker.step(0, 0.0, false, &empty_book, None);
        assert_eq!(broker.get_order(&order_id).unwrap().status, OrderStatus::Active);

        broker.cancel_order(&order_id, 5, 5.0).unwrap();

        let book = snapshot_book(json!([]), json!([{"price": "0.46", "size": "100"}]));
        let fills = broker.step(5, 5.0, true, &book, Some("asset-1"));

        assert_eq!(fills.len(), 1);
        assert_eq!(broker.get_order(&order_id).unwrap().status, OrderStatus::Filled);
    }

    /// Scenario: submit_order with limit_price outside (0, 1].
    /// Expected: rejected with BrokerError::InvalidPrice, no order created.
    #[test]
    fn rejects_out_of_range_limit_price() {
        let mut broker = SimBroker::new(ZERO_LATENCY);
        let err = broker.submit_order(
            "asset-1",
            Side::Buy,
            "1.50".parse().unwrap(),
            "10".parse().unwrap(),
            0,
            0.0,
            None,
        );
        assert!(err.is_err());
    }

    /// Scenario: cancel an order id that was never submitted.
    /// Expected: BrokerError::OrderNotFound.
    #[test]
    fn cancel_missing_order_errors() {
        let mut broker = SimBroker::new(ZERO_LATENCY);
        let err = broker.cancel_order("does-not-exist", 1, 1.0);
        assert!(matches!(err, Err(BrokerError::OrderNotFound { .. })));
    }

    /// Scenario: cancel an order that has already filled.
    /// Expected: BrokerError::OrderTerminal.
    #[test]
    fn cancel_terminal_order_errors() {
        let mut broker = SimBroker::new(ZERO_LATENCY);
        let order_id = broker
            .submit_order("asset-1", Side::Buy, "0.50".parse().unwrap(), "10".parse().unwrap(), 0, 0.0, None)
            .unwrap();
        let book = snapshot_book(json!([]), json!([{"price": "0.40", "size": "100"}]));
        broker.step(0, 0.0, true, &book, Some("asset-1"));
        assert_eq!(broker.get_order(&order_id).unwrap().status, OrderStatus::Filled);
        let err = broker.cancel_order(&order_id, 1, 1.0);
        assert!(matches!(err, Err(BrokerError::OrderTerminal { .. })));
    }

    /// Scenario: an order with submit_ticks=2 at a non-book event before
    /// its effective_seq.
    /// Expected: order stays pending, no activation event yet.
    #[test]
    fn pending_order_not_yet_active() {
        let mut broker = SimBroker::new(LatencyConfig { submit_ticks: 2, cancel_ticks: 0 });
        let order_id = broker
            .submit_order("asset-1", Side::Buy, "0.50".parse().unwrap(), "10".parse().unwrap(), 0, 0.0, None)
            .unwrap();
        let book = L2Book::new("asset-1", true);
        broker.step(1, 1.0, false, &book, None);
        assert_eq!(broker.get_order(&order_id).unwrap().status, OrderStatus::Pending);
    }

    /// Scenario: fill_asset_id filters the fill phase to one asset.
    /// Expected: an order on a different asset is not evaluated for fills
    /// even though the event is book-affecting.
    #[test]
    fn fill_asset_id_filters_orders() {
        let mut broker = SimBroker::new(ZERO_LATENCY);
        let order_id = broker
            .submit_order("asset-2", Side::Buy, "0.50".parse().unwrap(), "10".parse().unwrap(), 0, 0.0, None)
            .unwrap();
        let book = snapshot_book(json!([]), json!([{"price": "0.40", "size": "100"}]));
        broker.step(0, 0.0, true, &book, Some("asset-1"));
        assert_eq!(broker.get_order(&order_id).unwrap().status, OrderStatus::Active);
    }
}
