//! Canonical event envelope and type constants (spec.md §4.A).
//!
//! Grounded on `simtrader/tape/schema.py`. Every event that leaves the
//! normalizer (Component C) or is read back by the loader (Component D)
//! carries this envelope.

use serde::{Deserialize, Serialize};

/// Current schema version. Bump on shape change; the loader does not
/// reject older versions today (there is only one), but the field exists
/// so a future migration has somewhere to branch.
pub const PARSER_VERSION: u32 = 1;

/// The normalized event types the core understands. Anything else is
/// dropped at the normalization boundary and never constructed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Book,
    PriceChange,
    LastTradePrice,
    TickSizeChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Book => "book",
            EventType::PriceChange => "price_change",
            EventType::LastTradePrice => "last_trade_price",
            EventType::TickSizeChange => "tick_size_change",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "book" => Some(EventType::Book),
            "price_change" => Some(EventType::PriceChange),
            "last_trade_price" => Some(EventType::LastTradePrice),
            "tick_size_change" => Some(EventType::TickSizeChange),
            _ => None,
        }
    }

    /// Whether this event type can modify an L2 book (spec.md §3's
    /// "Book-affecting?" column).
    pub fn is_book_affecting(self) -> bool {
        matches!(self, EventType::Book | EventType::PriceChange)
    }
}

/// A normalized event, stored as a raw `serde_json::Value` payload plus
/// the envelope fields pulled out for fast access. Keeping the payload as
/// `Value` (rather than a per-type struct) matches the source's dict-based
/// events and lets `book`/`price_change`/`price_changes` fields of either
/// legacy or modern shape round-trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub parser_version: u32,
    pub seq: u64,
    pub ts_recv: f64,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_str(&self.event_type)
    }

    /// Known `KNOWN_EVENT_TYPES` membership check, grounded on
    /// `tape/schema.py`'s frozenset of the same name.
    pub fn is_known(event_type: &str) -> bool {
        EventType::from_str(event_type).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: round-trip every known event type string through
    /// `EventType::from_str`/`as_str`.
    /// Expected: every variant survives the round trip unchanged.
    #[test]
    fn event_type_round_trips() {
        for s in ["book", "price_change", "last_trade_price", "tick_size_change"] {
            let ty = EventType::from_str(s).expect("known type");
            assert_eq!(ty.as_str(), s);
        }
    }

    /// Scenario: an event type outside the known set.
    /// Expected: `from_str` returns `None` and `is_known` returns `false`.
    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(EventType::from_str("last_trade").is_none());
        assert!(!Event::is_known("tick_size"));
    }

    /// Scenario: check which event types are book-affecting.
    /// Expected: only `book` and `price_change` are; the other two are not.
    #[test]
    fn book_affecting_classification() {
        assert!(EventType::Book.is_book_affecting());
        assert!(EventType::PriceChange.is_book_affecting());
        assert!(!EventType::LastTradePrice.is_book_affecting());
        assert!(!EventType::TickSizeChange.is_book_affecting());
    }
}
