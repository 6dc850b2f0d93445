//! Per-asset L2 order book state machine (spec.md §4.B).
//!
//! Grounded on `simtrader/orderbook/l2book.py`. Prices and sizes use
//! `rust_decimal::Decimal` throughout — no float ever touches a stored
//! level, matching the arithmetic invariant in spec.md §4.B/§9.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::L2BookError;
use crate::tape::schema::{Event, EventType};

/// One resting level, returned by `top_bids`/`top_asks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// One entry of a legacy `changes[]` list or a modern `price_changes[]`
/// list — the two formats share this per-level shape once parsed.
#[derive(Debug, Clone)]
pub struct PriceChange {
    pub asset_id: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// An asset's L2 book: two price→size maps plus an initialized flag.
///
/// `BTreeMap<Decimal, Decimal>` keeps levels ordered by price so
/// `best_bid`/`best_ask`/`top_bids`/`top_asks` never need to re-sort.
pub struct L2Book {
    pub asset_id: String,
    strict: bool,
    initialized: bool,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl L2Book {
    pub fn new(asset_id: impl Into<String>, strict: bool) -> Self {
        Self {
            asset_id: asset_id.into(),
            strict,
            initialized: false,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(&price, &size)| BookLevel { price, size })
            .collect()
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(&price, &size)| BookLevel { price, size })
            .collect()
    }

    pub(crate) fn levels_for_side(&self, side: Side) -> &BTreeMap<Decimal, Decimal> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Apply one normalized event. Returns `Ok(applied)`: `applied` is
    /// `true` when the event modified or initialized the book.
    ///
    /// `book` events always apply (clear + rebuild). `price_change`
    /// events (legacy `changes[]` shape) require prior initialization:
    /// strict mode errors, lenient mode logs and returns `Ok(false)`.
    /// Any other event type is a no-op.
    pub fn apply(&mut self, event: &Event) -> Result<bool, L2BookError> {
        match event.event_type() {
            Some(EventType::Book) => {
                self.apply_snapshot(event);
                Ok(true)
            }
            Some(EventType::PriceChange) => {
                if !self.initialized {
                    return self.reject_uninitialized();
                }
                if let Some(changes) = event.payload.get("changes").and_then(|v| v.as_array()) {
                    for change in changes {
                        self.apply_change_value(change);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Apply one entry of a modern batched `price_changes[]` array. Same
    /// initialization guard as `apply` for the legacy shape.
    pub fn apply_single_delta(&mut self, change: &PriceChange) -> Result<bool, L2BookError> {
        if !self.initialized {
            return self.reject_uninitialized();
        }
        self.apply_parsed_change(change.side, change.price, change.size);
        Ok(true)
    }

    fn reject_uninitialized(&self) -> Result<bool, L2BookError> {
        if self.strict {
            Err(L2BookError::NotInitialized {
                asset_id: self.asset_id.clone(),
            })
        } else {
            eprintln!(
                "[BOOK] price_change before snapshot for {}, skipping (lenient mode)",
                self.asset_id
            );
            Ok(false)
        }
    }

    fn apply_snapshot(&mut self, event: &Event) {
        self.bids.clear();
        self.asks.clear();
        if let Some(bids) = event.payload.get("bids").and_then(|v| v.as_array()) {
            for level in bids {
                if let Some((price, size)) = parse_level(level) {
                    if size > Decimal::ZERO {
                        self.bids.insert(price, size);
                    }
                }
            }
        }
        if let Some(asks) = event.payload.get("asks").and_then(|v| v.as_array()) {
            for level in asks {
                if let Some((price, size)) = parse_level(level) {
                    if size > Decimal::ZERO {
                        self.asks.insert(price, size);
                    }
                }
            }
        }
        self.initialized = true;
    }

    fn apply_change_value(&mut self, change: &serde_json::Value) {
        let side = match change.get("side").and_then(|v| v.as_str()).and_then(Side::from_str) {
            Some(s) => s,
            None => {
                eprintln!("[BOOK] price_change entry with unknown/missing side, skipping");
                return;
            }
        };
        let price = match change
            .get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
        {
            Some(p) => p,
            None => {
                eprintln!("[BOOK] price_change entry missing/invalid price, skipping");
                return;
            }
        };
        let size_raw = change
            .get("size")
            .and_then(|v| v.as_str())
            .unwrap_or("0");
        let size = match size_raw.parse::<Decimal>() {
            Ok(s) => s,
            Err(_) => {
                eprintln!("[BOOK] price_change entry invalid size {:?}, skipping", size_raw);
                return;
            }
        };
        self.apply_parsed_change(side, price, size);
    }

    fn apply_parsed_change(&mut self, side: Side, price: Decimal, size: Decimal) {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size <= Decimal::ZERO {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }
    }
}

/// Parse the modern batched `price_changes[]` array into per-entry
/// `PriceChange`s, each carrying its own `asset_id` so the caller can
/// route it to the right book.
pub fn parse_price_changes(payload: &serde_json::Map<String, serde_json::Value>) -> Vec<PriceChange> {
    let mut out = Vec::new();
    let Some(entries) = payload.get("price_changes").and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in entries {
        let asset_id = entry.get("asset_id").and_then(|v| v.as_str()).map(|s| s.to_string());
        let side = match entry.get("side").and_then(|v| v.as_str()).and_then(Side::from_str) {
            Some(s) => s,
            None => continue,
        };
        let price = match entry
            .get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
        {
            Some(p) => p,
            None => continue,
        };
        let size = entry
            .get("size")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        out.push(PriceChange { asset_id, side, price, size });
    }
    out
}

/// Parse one book level from either `{"price"/"p", "size"/"s"}` (dict
/// shape) or `[price, size]` (list shape), per `l2book.py`'s
/// `_parse_level`.
fn parse_level(level: &serde_json::Value) -> Option<(Decimal, Decimal)> {
    if let Some(arr) = level.as_array() {
        if arr.len() < 2 {
            return None;
        }
        let price = value_to_decimal(&arr[0])?;
        let size = value_to_decimal(&arr[1])?;
        return Some((price, size));
    }
    let price = level
        .get("price")
        .or_else(|| level.get("p"))
        .and_then(value_to_decimal)?;
    let size = level
        .get("size")
        .or_else(|| level.get("s"))
        .and_then(value_to_decimal)?;
    Some((price, size))
}

fn value_to_decimal(v: &serde_json::Value) -> Option<Decimal> {
    if let Some(s) = v.as_str() {
        return s.parse().ok();
    }
    if let Some(f) = v.as_f64() {
        return Decimal::try_from(f).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, asset_id: &str, body: serde_json::Value) -> Event {
        let mut payload = body.as_object().cloned().unwrap_or_default();
        payload.remove("event_type");
        Event {
            parser_version: 1,
            seq: 0,
            ts_recv: 0.0,
            event_type: event_type.to_string(),
            asset_id: Some(asset_id.to_string()),
            payload,
        }
    }

    /// Scenario: apply a `book` snapshot with two bid levels and one ask.
    /// Expected: best_bid is the higher bid, best_ask is the single ask,
    /// and the book reports initialized.
    #[test]
    fn snapshot_initializes_book() {
        let mut book = L2Book::new("asset-1", true);
        let evt = event(
            "book",
            "asset-1",
            json!({
                "bids": [{"price": "0.40", "size": "10"}, {"price": "0.44", "size": "100"}],
                "asks": [{"price": "0.46", "size": "100"}],
            }),
        );
        assert!(book.apply(&evt).unwrap());
        assert!(book.is_initialized());
        assert_eq!(book.best_bid(), Some(Decimal::new(44, 2)));
        assert_eq!(book.best_ask(), Some(Decimal::new(46, 2)));
    }

    /// Scenario: a zero-size level in a snapshot.
    /// Expected: the level is dropped entirely, never inserted.
    #[test]
    fn snapshot_drops_zero_size_levels() {
        let mut book = L2Book::new("asset-1", true);
        let evt = event(
            "book",
            "asset-1",
            json!({"bids": [{"price": "0.40", "size": "0"}], "asks": []}),
        );
        book.apply(&evt).unwrap();
        assert_eq!(book.best_bid(), None);
    }

    /// Scenario: strict-mode book receives a `price_change` before any
    /// `book` snapshot.
    /// Expected: `apply` returns `Err(L2BookError::NotInitialized)`.
    #[test]
    fn strict_mode_rejects_premature_delta() {
        let mut book = L2Book::new("asset-1", true);
        let evt = event(
            "price_change",
            "asset-1",
            json!({"changes": [{"side": "BUY", "price": "0.40", "size": "10"}]}),
        );
        assert!(book.apply(&evt).is_err());
    }

    /// Scenario: lenient-mode book receives a `price_change` before any
    /// `book` snapshot.
    /// Expected: `apply` returns `Ok(false)` and the book stays empty.
    #[test]
    fn lenient_mode_skips_premature_delta() {
        let mut book = L2Book::new("asset-1", false);
        let evt = event(
            "price_change",
            "asset-1",
            json!({"changes": [{"side": "BUY", "price": "0.40", "size": "10"}]}),
        );
        assert_eq!(book.apply(&evt).unwrap(), false);
        assert_eq!(book.best_bid(), None);
    }

    /// Scenario: apply a snapshot, then a legacy `price_change` that sets
    /// size to 0 on an existing level.
    /// Expected: the level is removed; `best_bid` updates accordingly.
    #[test]
    fn delta_with_zero_size_removes_level() {
        let mut book = L2Book::new("asset-1", true);
        book.apply(&event(
            "book",
            "asset-1",
            json!({"bids": [{"price": "0.40", "size": "10"}], "asks": []}),
        ))
        .unwrap();
        book.apply(&event(
            "price_change",
            "asset-1",
            json!({"changes": [{"side": "BUY", "price": "0.40", "size": "0"}]}),
        ))
        .unwrap();
        assert_eq!(book.best_bid(), None);
    }

    /// Scenario: `size = 0` delta for a level that never existed.
    /// Expected: no-op, no panic, book stays empty on that side.
    #[test]
    fn zero_size_delta_on_missing_level_is_noop() {
        let mut book = L2Book::new("asset-1", true);
        book.apply(&event("book", "asset-1", json!({"bids": [], "asks": []})))
            .unwrap();
        book.apply(&event(
            "price_change",
            "asset-1",
            json!({"changes": [{"side": "SELL", "price": "0.90", "size": "0"}]}),
        ))
        .unwrap();
        assert_eq!(book.best_ask(), None);
    }

    /// Scenario: apply_single_delta for the modern batched shape on an
    /// initialized book.
    /// Expected: the level is inserted and visible via top_asks.
    #[test]
    fn apply_single_delta_inserts_level() {
        let mut book = L2Book::new("asset-1", true);
        book.apply(&event("book", "asset-1", json!({"bids": [], "asks": []})))
            .unwrap();
        let change = PriceChange {
            asset_id: Some("asset-1".to_string()),
            side: Side::Sell,
            price: Decimal::new(48, 2),
            size: Decimal::new(25, 0),
        };
        assert!(book.apply_single_delta(&change).unwrap());
        let top = book.top_asks(5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].price, Decimal::new(48, 2));
        assert_eq!(top[0].size, Decimal::new(25, 0));
    }

    /// Scenario: top_bids/top_asks ordering with more levels than requested.
    /// Expected: bids descending, asks ascending, truncated to n.
    #[test]
    fn top_levels_are_ordered_and_truncated() {
        let mut book = L2Book::new("asset-1", true);
        book.apply(&event(
            "book",
            "asset-1",
            json!({
                "bids": [{"price": "0.10", "size": "1"}, {"price": "0.30", "size": "1"}, {"price": "0.20", "size": "1"}],
                "asks": [{"price": "0.70", "size": "1"}, {"price": "0.60", "size": "1"}],
            }),
        ))
        .unwrap();
        let bids = book.top_bids(2);
        assert_eq!(bids[0].price, Decimal::new(30, 2));
        assert_eq!(bids[1].price, Decimal::new(20, 2));
        let asks = book.top_asks(5);
        assert_eq!(asks[0].price, Decimal::new(60, 2));
        assert_eq!(asks[1].price, Decimal::new(70, 2));
    }

    /// Scenario: an unknown event type reaches apply().
    /// Expected: no-op, returns Ok(false).
    #[test]
    fn unknown_event_type_is_noop() {
        let mut book = L2Book::new("asset-1", true);
        let evt = event("tick_size_change", "asset-1", json!({}));
        assert_eq!(book.apply(&evt).unwrap(), false);
    }
}
