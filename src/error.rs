//! Component-scoped error types (spec.md §7).
//!
//! Event-level failures (malformed lines, invalid deltas, rejected fills)
//! are never represented here — they are warnings or ordinary `Ok` values.
//! These enums cover only the "hard failure, surface to caller" cases.

use rust_decimal::Decimal;
use thiserror::Error;

/// Component B (L2 book) failures. Only constructed in strict mode; lenient
/// mode logs and returns `applied = false` instead.
#[derive(Debug, Error)]
pub enum L2BookError {
    #[error("price_change received before book snapshot for asset {asset_id}")]
    NotInitialized { asset_id: String },
}

/// Component O (config) failures. Direct translation of `config_loader.py`'s
/// `ConfigLoadError`.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {0}")]
    NotFound(std::path::PathBuf),
    #[error("config is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("config must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("provide only one of config_path or config_json, not both")]
    BothProvided,
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Component D (tape loader) failures.
#[derive(Debug, Error)]
pub enum TapeLoadError {
    #[error("tape is empty: {0}")]
    Empty(std::path::PathBuf),
    #[error("failed to read tape: {0}")]
    Io(#[from] std::io::Error),
}

/// Component G (sim broker) caller errors. `step()` never returns these —
/// only `cancel_order` does.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },
    #[error("order {order_id} is already terminal ({status})")]
    OrderTerminal { order_id: String, status: String },
    #[error("limit_price must be in (0, 1], got {0}")]
    InvalidPrice(Decimal),
    #[error("size must be > 0, got {0}")]
    InvalidSize(Decimal),
}

/// Top-level failures that abort a replay/shadow run before or during
/// processing. Event-level issues never reach this type — see the
/// per-component enums above and spec.md §7's propagation policy.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Tape(#[from] TapeLoadError),
    #[error("strict-mode book error: {0}")]
    Book(#[from] L2BookError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

