//! Run configuration from environment variables, plus strategy-config
//! loading (spec.md §6, Component O).
//!
//! The env-var fallback-chain style is grounded on the teacher's own
//! `Config::from_env`; `load_json_from_path`/`load_json_from_string`/
//! `load_strategy_config` are a direct translation of `config_loader.py`.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde_json::Value;

use crate::broker::LatencyConfig;
use crate::error::ConfigLoadError;
use crate::portfolio::MarkMethod;
use crate::strategy::RunConfig;
use crate::tape::recorder::ws_market_url_default;

/// Top-level run configuration assembled from the environment, matching
/// the fallback-chain shape of the teacher's own `Config::from_env`.
#[derive(Clone)]
pub struct EnvConfig {
    pub run: RunConfig,
    pub ws_url: String,
    pub run_dir: PathBuf,
    pub max_ws_stall_seconds: f64,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let primary_asset_id = std::env::var("PRIMARY_ASSET_ID").unwrap_or_default();
        let starting_cash: Decimal = std::env::var("STARTING_CASH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(rust_decimal_macros::dec!(1000));
        let fee_rate_bps: Option<Decimal> = std::env::var("FEE_RATE_BPS").ok().and_then(|s| s.parse().ok());
        let mark_method = std::env::var("MARK_METHOD")
            .ok()
            .and_then(|s| MarkMethod::from_str(&s))
            .unwrap_or(MarkMethod::Bid);
        let strict = std::env::var("STRICT_BOOK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let submit_ticks: u64 = std::env::var("LATENCY_SUBMIT_TICKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let cancel_ticks: u64 = std::env::var("LATENCY_CANCEL_TICKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let ws_url = std::env::var("PM_CLOB_WS").unwrap_or_else(|_| ws_market_url_default().to_string());
        let run_dir = std::env::var("RUN_DIR").unwrap_or_else(|_| "runs/session".to_string()).into();
        let max_ws_stall_seconds: f64 = std::env::var("MAX_WS_STALL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30.0);

        Self {
            run: RunConfig {
                primary_asset_id,
                starting_cash,
                fee_rate_bps,
                mark_method,
                strict,
                latency: LatencyConfig { submit_ticks, cancel_ticks },
            },
            ws_url,
            run_dir,
            max_ws_stall_seconds,
        }
    }
}

/// Load a JSON file, accepting a leading UTF-8 BOM (PowerShell 5.1's
/// `Out-File` writes one by default; Rust has no "utf-8-sig" codec, so the
/// BOM character is stripped manually after reading as plain UTF-8).
pub fn load_json_from_path(path: &Path) -> Result<Value, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.to_path_buf()));
    }
    let mut text = std::fs::read_to_string(path)?;
    if text.starts_with('\u{feff}') {
        text = text.trim_start_matches('\u{feff}').to_string();
    }
    let value: Value = serde_json::from_str(&text)?;
    if !value.is_object() {
        return Err(ConfigLoadError::NotAnObject(json_type_name(&value)));
    }
    Ok(value)
}

/// Parse a JSON string into an object. Strips surrounding whitespace, a
/// single pair of outer single quotes (left by PowerShell pipelines), and
/// a leading BOM character.
pub fn load_json_from_string(raw: &str) -> Result<Value, ConfigLoadError> {
    let mut s = raw.trim();
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        s = s[1..s.len() - 1].trim();
    }
    let s = s.trim_start_matches('\u{feff}');

    let value: Value = serde_json::from_str(s)?;
    if !value.is_object() {
        return Err(ConfigLoadError::NotAnObject(json_type_name(&value)));
    }
    Ok(value)
}

/// Load strategy config from a file path, a JSON string, or neither
/// (returning an empty object). Exactly one of `config_path`/`config_json`
/// may be given.
pub fn load_strategy_config(
    config_path: Option<&Path>,
    config_json: Option<&str>,
) -> Result<Value, ConfigLoadError> {
    match (config_path, config_json) {
        (Some(_), Some(_)) => Err(ConfigLoadError::BothProvided),
        (Some(path), None) => load_json_from_path(path),
        (None, Some(raw)) => load_json_from_string(raw),
        (None, None) => Ok(Value::Object(serde_json::Map::new())),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Scenario: a config string wrapped in single quotes with a leading
    /// BOM, as a PowerShell pipeline would produce.
    /// Expected: both artifacts are stripped and the JSON parses.
    #[test]
    fn load_json_from_string_strips_quotes_and_bom() {
        let raw = "'\u{feff}{\"a\": 1}'";
        let value = load_json_from_string(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    /// Scenario: a JSON file starting with a UTF-8 BOM.
    /// Expected: loads successfully as an object.
    #[test]
    fn load_json_from_path_strips_bom() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("\u{feff}{\"b\": 2}".as_bytes()).unwrap();
        let value = load_json_from_path(file.path()).unwrap();
        assert_eq!(value["b"], 2);
    }

    /// Scenario: both config_path and config_json given.
    /// Expected: ConfigLoadError::BothProvided.
    #[test]
    fn load_strategy_config_rejects_both_provided() {
        let err = load_strategy_config(Some(Path::new("x.json")), Some("{}"));
        assert!(matches!(err, Err(ConfigLoadError::BothProvided)));
    }

    /// Scenario: neither config_path nor config_json given.
    /// Expected: an empty JSON object.
    #[test]
    fn load_strategy_config_defaults_to_empty_object() {
        let value = load_strategy_config(None, None).unwrap();
        assert_eq!(value, Value::Object(serde_json::Map::new()));
    }

    /// Scenario: a JSON string that is an array, not an object.
    /// Expected: ConfigLoadError::NotAnObject.
    #[test]
    fn load_json_from_string_rejects_non_object() {
        let err = load_json_from_string("[1, 2, 3]");
        assert!(matches!(err, Err(ConfigLoadError::NotAnObject(_))));
    }
}
