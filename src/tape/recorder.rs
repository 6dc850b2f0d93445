//! Tape recorder: resilient WS consumer (spec.md §4.C).
//!
//! Connect/reconnect/backoff loop grounded on `feeds/polymarket.rs`'s
//! `polymarket_feed`; raw+normalized dual-writer grounded on
//! `bin/recorder.rs`'s writer-task structure (there, CSV; here, JSONL per
//! spec.md §6). The subscribe payload's `initial_dump: true` field is
//! grounded on `shadow/runner.py`'s `_ws_loop`, which the teacher's own
//! `polymarket.rs` omits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::artifact::{write_json_pretty, JsonlAppender};
use crate::tape::schema::{Event, PARSER_VERSION};

pub const DEFAULT_RECONNECT_SLEEP_SECONDS: u64 = 1;
const MAX_BACKOFF_MS: u64 = 10_000;
const PING_INTERVAL_SECS: u64 = 10;

pub struct RecorderConfig {
    pub ws_url: String,
    pub asset_ids: Vec<String>,
    pub run_dir: PathBuf,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecorderMeta {
    pub ws_url: String,
    pub asset_ids: Vec<String>,
    pub source: String,
    pub started_at: f64,
    pub ended_at: f64,
    pub recv_timeout_seconds: f64,
    pub reconnect_count: u64,
    pub frame_count: u64,
    pub event_count: u64,
    pub warnings: Vec<String>,
}

/// One line of `raw_ws.jsonl` — the verbatim WS payload, for post-hoc
/// forensics.
#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    frame_seq: u64,
    ts_recv: f64,
    raw: String,
}

/// Run the recorder until `stop` is set or `duration_seconds` elapses.
/// Writes `raw_ws.jsonl`, `events.jsonl`, and `meta.json` into
/// `config.run_dir`.
pub async fn record(config: RecorderConfig, stop: Arc<AtomicBool>) -> std::io::Result<RecorderMeta> {
    std::fs::create_dir_all(&config.run_dir)?;
    let mut raw_fh = JsonlAppender::create(&config.run_dir.join("raw_ws.jsonl"))?;
    let mut events_fh = JsonlAppender::create(&config.run_dir.join("events.jsonl"))?;

    let started_at = now_secs();
    let deadline = config.duration_seconds.map(|d| started_at + d);

    let mut meta = RecorderMeta {
        ws_url: config.ws_url.clone(),
        asset_ids: config.asset_ids.clone(),
        source: "websocket".to_string(),
        started_at,
        recv_timeout_seconds: (PING_INTERVAL_SECS) as f64,
        ..Default::default()
    };

    let mut frame_seq: u64 = 0;
    let mut event_seq: u64 = 0;
    let mut backoff_ms: u64 = 1000;
    let mut first_connect = true;

    'reconnect: loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Some(dl) = deadline {
            if now_secs() >= dl {
                break;
            }
        }

        eprintln!("[RECORDER] Connecting to {}", config.ws_url);
        let ws = match connect_async(&config.ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[RECORDER] Connected");
                if !first_connect {
                    meta.reconnect_count += 1;
                }
                first_connect = false;
                backoff_ms = 1000;
                ws
            }
            Err(e) => {
                let msg = format!("connect failed: {}, retrying in {}ms", e, backoff_ms);
                eprintln!("[RECORDER] {}", msg);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                continue 'reconnect;
            }
        };

        let (mut write, mut read) = ws.split();
        let subscribe = serde_json::json!({
            "assets_ids": config.asset_ids,
            "type": "market",
            "custom_feature_enabled": true,
            "initial_dump": true,
        });
        if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
            meta.warnings.push(format!("subscribe failed: {}", e));
            eprintln!("[RECORDER] Subscribe failed: {}, reconnecting", e);
            continue 'reconnect;
        }

        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));

        'recv: loop {
            if stop.load(Ordering::Relaxed) {
                break 'reconnect;
            }
            if let Some(dl) = deadline {
                if now_secs() >= dl {
                    break 'reconnect;
                }
            }

            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            meta.warnings.push(format!("ws error: {}", e));
                            eprintln!("[RECORDER] WS error: {}, reconnecting", e);
                            break 'recv;
                        }
                        None => {
                            eprintln!("[RECORDER] Stream ended, reconnecting");
                            break 'recv;
                        }
                    };

                    if let Message::Text(text) = msg {
                        let ts_recv = now_secs();
                        frame_seq += 1;
                        meta.frame_count += 1;
                        raw_fh.append(&RawFrame { frame_seq, ts_recv, raw: text.clone() })?;

                        match normalize_frame(&text, ts_recv, &mut event_seq) {
                            Ok(events) => {
                                for event in &events {
                                    events_fh.append(event)?;
                                }
                                meta.event_count += events.len() as u64;
                            }
                            Err(warning) => {
                                meta.warnings.push(warning.clone());
                                eprintln!("[RECORDER] {}", warning);
                            }
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Ping(Vec::new())).await;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }

    meta.ended_at = now_secs();
    write_json_pretty(&config.run_dir.join("meta.json"), &meta)?;
    Ok(meta)
}

/// Parse one WS frame into zero or more normalized events. Accepts both a
/// single JSON object and a top-level array of objects. Unknown
/// `event_type` values are dropped silently, not counted as a warning —
/// only malformed JSON produces one.
fn normalize_frame(text: &str, ts_recv: f64, event_seq: &mut u64) -> Result<Vec<Event>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("malformed frame json: {}", e))?;

    let objects: Vec<Value> = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Ok(Vec::new()),
    };

    let mut events = Vec::new();
    for obj in objects {
        let event_type = obj
            .get("event_type")
            .or_else(|| obj.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if !Event::is_known(event_type) {
            continue;
        }

        let asset_id = obj.get("asset_id").and_then(|v| v.as_str()).map(|s| s.to_string());
        let mut payload = obj.as_object().cloned().unwrap_or_default();
        payload.remove("event_type");
        payload.remove("type");
        payload.remove("asset_id");

        *event_seq += 1;
        events.push(Event {
            parser_version: PARSER_VERSION,
            seq: *event_seq,
            ts_recv,
            event_type: event_type.to_string(),
            asset_id,
            payload,
        });
    }
    Ok(events)
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn ws_market_url_default() -> &'static str {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market"
}

/// Convenience used by tests and the on-demand/shadow event sources to
/// re-run the same normalization the live recorder uses, without a socket.
pub fn normalize_frame_for_test(text: &str, ts_recv: f64, event_seq: &mut u64) -> Result<Vec<Event>, String> {
    normalize_frame(text, ts_recv, event_seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a single JSON object frame with a known event_type.
    /// Expected: exactly one normalized event, seq assigned starting at 1.
    #[test]
    fn normalizes_single_object_frame() {
        let mut seq = 0u64;
        let events = normalize_frame_for_test(
            r#"{"event_type":"book","asset_id":"a1","bids":[],"asks":[]}"#,
            1.0,
            &mut seq,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].asset_id.as_deref(), Some("a1"));
    }

    /// Scenario: a top-level array of two frames, one known and one
    /// unknown event_type.
    /// Expected: only the known one survives normalization; seq keeps
    /// incrementing monotonically across frames.
    #[test]
    fn normalizes_array_of_objects_dropping_unknown() {
        let mut seq = 5u64;
        let events = normalize_frame_for_test(
            r#"[{"event_type":"last_trade_price","asset_id":"a1","price":"0.5"},
                {"event_type":"mystery","asset_id":"a1"}]"#,
            2.0,
            &mut seq,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 6);
        assert_eq!(events[0].event_type, "last_trade_price");
    }

    /// Scenario: malformed JSON text.
    /// Expected: `normalize_frame` returns an `Err`, not a panic.
    #[test]
    fn malformed_json_is_an_error_not_panic() {
        let mut seq = 0u64;
        assert!(normalize_frame_for_test("not json", 1.0, &mut seq).is_err());
    }
}
