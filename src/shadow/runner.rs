//! Shadow runner: live-WS market feed driven straight into a strategy, no
//! tape file required first (spec.md §4.K).
//!
//! Grounded on `shadow/runner.py`'s `ShadowRunner`. The per-event pipeline
//! is the exact one `strategy::runner::process_one_event` already
//! implements for replay — this module only adds the live WS loop, the
//! stall kill-switch, and an offline `_event_source`-equivalent path
//! (`run_with_events`) so spec.md §8's shadow-stall scenario is testable
//! without a socket.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::artifact::{write_json_pretty, write_jsonl, JsonlAppender};
use crate::portfolio::PortfolioSummary;
use crate::strategy::base::Strategy;
use crate::strategy::runner::{process_one_event, ReplayState, RunConfig, RunManifest, RunMeta};
use crate::tape::recorder::{normalize_frame_for_test, RecorderMeta};
use crate::tape::schema::Event;

const DEFAULT_MAX_WS_STALL_SECONDS: f64 = 30.0;
const PING_INTERVAL_SECS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub ws_reconnects: u64,
    pub ws_timeouts: u64,
    pub events_received: u64,
    pub batched_price_changes: u64,
    pub per_asset_update_counts: HashMap<String, u64>,
}

impl RunMetrics {
    fn increment_asset(&mut self, asset_id: &str) {
        *self.per_asset_update_counts.entry(asset_id.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowManifest {
    #[serde(flatten)]
    pub base: RunManifest,
    pub shadow_context: serde_json::Value,
    pub run_metrics: RunMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
}

pub struct ShadowConfig {
    pub run_dir: PathBuf,
    pub run: RunConfig,
    pub asset_ids: Vec<String>,
    pub extra_book_asset_ids: Vec<String>,
    pub ws_url: String,
    pub tape_dir: Option<PathBuf>,
    pub shadow_context: serde_json::Value,
    pub max_ws_stall_seconds: f64,
    pub duration_seconds: Option<f64>,
}

impl ShadowConfig {
    pub fn new(run_dir: PathBuf, run: RunConfig, asset_ids: Vec<String>) -> Self {
        Self {
            run_dir,
            run,
            asset_ids,
            extra_book_asset_ids: Vec::new(),
            ws_url: crate::tape::recorder::ws_market_url_default().to_string(),
            tape_dir: None,
            shadow_context: serde_json::Value::Null,
            max_ws_stall_seconds: DEFAULT_MAX_WS_STALL_SECONDS,
            duration_seconds: None,
        }
    }
}

pub struct ShadowRunner {
    config: ShadowConfig,
}

impl ShadowRunner {
    pub fn new(config: ShadowConfig) -> Self {
        Self { config }
    }

    /// Run against the live Polymarket market WS feed until disconnected,
    /// stalled, `duration_seconds` elapses, or the process is interrupted.
    pub async fn run(&self, strategy: &mut dyn Strategy) -> std::io::Result<PortfolioSummary> {
        std::fs::create_dir_all(&self.config.run_dir)?;
        let mut tape_writers = match &self.config.tape_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some((
                    JsonlAppender::create(&dir.join("raw_ws.jsonl"))?,
                    JsonlAppender::create(&dir.join("events.jsonl"))?,
                ))
            }
            None => None,
        };

        let mut state = ReplayState::new(self.config.run.latency);
        let mut metrics = RunMetrics::default();
        strategy.on_start(&self.config.run.primary_asset_id, self.config.run.starting_cash);

        let tape_started_at = now_secs();
        let started = std::time::Instant::now();
        let stall = Duration::from_secs_f64(self.config.max_ws_stall_seconds.max(0.0));
        let mut frame_seq: u64 = 0;
        let mut event_seq: u64 = 0;
        let mut backoff_ms: u64 = 1000;
        let mut exit_reason: Option<String> = None;

        'reconnect: loop {
            if let Some(d) = self.config.duration_seconds {
                if started.elapsed().as_secs_f64() >= d {
                    break;
                }
            }

            eprintln!("[SHADOW] Connecting to {}", self.config.ws_url);
            let ws = match connect_async(&self.config.ws_url).await {
                Ok((ws, _)) => {
                    backoff_ms = 1000;
                    ws
                }
                Err(e) => {
                    metrics.ws_reconnects += 1;
                    eprintln!("[SHADOW] connect failed: {}, retrying in {}ms", e, backoff_ms);
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                    continue 'reconnect;
                }
            };

            let (mut write, mut read) = ws.split();
            let subscribe = serde_json::json!({
                "assets_ids": self.config.asset_ids,
                "type": "market",
                "custom_feature_enabled": true,
                "initial_dump": true,
            });
            if write.send(Message::Text(subscribe.to_string())).await.is_err() {
                metrics.ws_reconnects += 1;
                continue 'reconnect;
            }

            let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
            let mut last_frame = std::time::Instant::now();

            'recv: loop {
                if let Some(d) = self.config.duration_seconds {
                    if started.elapsed().as_secs_f64() >= d {
                        break 'reconnect;
                    }
                }
                if !stall.is_zero() && last_frame.elapsed() >= stall {
                    exit_reason = Some(format!("ws_stall: no frames for {:.0}s", stall.as_secs_f64()));
                    break 'reconnect;
                }

                let stall_remaining = if stall.is_zero() {
                    Duration::from_secs(3600)
                } else {
                    stall.saturating_sub(last_frame.elapsed())
                };

                tokio::select! {
                    msg = read.next() => {
                        let msg = match msg {
                            Some(Ok(m)) => m,
                            Some(Err(e)) => {
                                eprintln!("[SHADOW] WS error: {}, reconnecting", e);
                                metrics.ws_reconnects += 1;
                                break 'recv;
                            }
                            None => {
                                eprintln!("[SHADOW] Stream ended, reconnecting");
                                metrics.ws_reconnects += 1;
                                break 'recv;
                            }
                        };
                        last_frame = std::time::Instant::now();

                        if let Message::Text(text) = msg {
                            let ts_recv = now_secs();
                            frame_seq += 1;
                            if let Some((raw_fh, _)) = tape_writers.as_mut() {
                                let _ = raw_fh.append_raw_line(&serde_json::json!({"frame_seq": frame_seq, "ts_recv": ts_recv, "raw": text}).to_string());
                            }

                            match normalize_frame_for_test(&text, ts_recv, &mut event_seq) {
                                Ok(events) => {
                                    for event in &events {
                                        if let Some((_, events_fh)) = tape_writers.as_mut() {
                                            let _ = events_fh.append(event);
                                        }
                                        metrics.events_received += 1;
                                        if event.event_type == "price_change" && event.payload.contains_key("price_changes") {
                                            metrics.batched_price_changes += 1;
                                        }
                                        if let Some(aid) = &event.asset_id {
                                            metrics.increment_asset(aid);
                                        }
                                        if process_one_event(&self.config.run, &mut state, event, strategy).is_err() {
                                            state.warnings.push(format!("strict_book_error at seq {}", event.seq));
                                        }
                                    }
                                }
                                Err(w) => state.warnings.push(w),
                            }
                        }
                    }
                    _ = ping_interval.tick() => {
                        let _ = write.send(Message::Ping(Vec::new())).await;
                    }
                    _ = tokio::time::sleep(stall_remaining) => {
                        exit_reason = Some(format!("ws_stall: no frames for {:.0}s", stall.as_secs_f64()));
                        break 'reconnect;
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }

        drop(tape_writers);
        if let Some(dir) = &self.config.tape_dir {
            let tape_meta = RecorderMeta {
                ws_url: self.config.ws_url.clone(),
                asset_ids: self.config.asset_ids.clone(),
                source: "websocket".to_string(),
                started_at: tape_started_at,
                ended_at: now_secs(),
                recv_timeout_seconds: PING_INTERVAL_SECS as f64,
                reconnect_count: metrics.ws_reconnects,
                frame_count: frame_seq,
                event_count: metrics.events_received,
                warnings: state.warnings.clone(),
            };
            write_json_pretty(&dir.join("meta.json"), &tape_meta)?;
        }
        self.finish(strategy, state, metrics, exit_reason)
    }

    /// Offline path used by tests (and the on-demand session's "catch up
    /// from a tape" mode): feed pre-normalized events directly, optionally
    /// simulating a stall exit after `stall_after_n_events`.
    pub fn run_with_events(
        &self,
        strategy: &mut dyn Strategy,
        events: &[Event],
        stall_after_n_events: Option<usize>,
    ) -> std::io::Result<PortfolioSummary> {
        std::fs::create_dir_all(&self.config.run_dir)?;
        let mut state = ReplayState::new(self.config.run.latency);
        let mut metrics = RunMetrics::default();
        strategy.on_start(&self.config.run.primary_asset_id, self.config.run.starting_cash);

        let mut exit_reason = None;
        for (i, event) in events.iter().enumerate() {
            if let Some(n) = stall_after_n_events {
                if i >= n {
                    exit_reason = Some(format!("ws_stall: no frames for {:.0}s", self.config.max_ws_stall_seconds));
                    break;
                }
            }
            metrics.events_received += 1;
            if event.event_type == "price_change" && event.payload.contains_key("price_changes") {
                metrics.batched_price_changes += 1;
            }
            if let Some(aid) = &event.asset_id {
                metrics.increment_asset(aid);
            }
            if process_one_event(&self.config.run, &mut state, event, strategy).is_err() {
                state.warnings.push(format!("strict_book_error at seq {}", event.seq));
            }
        }

        self.finish(strategy, state, metrics, exit_reason)
    }

    fn finish(
        &self,
        strategy: &mut dyn Strategy,
        state: ReplayState,
        metrics: RunMetrics,
        exit_reason: Option<String>,
    ) -> std::io::Result<PortfolioSummary> {
        strategy.on_finish();

        let mut ledger = crate::portfolio::PortfolioLedger::new(
            self.config.run.starting_cash,
            self.config.run.fee_rate_bps,
            self.config.run.mark_method,
        );
        let (ledger_events, equity_curve) = ledger.process(state.broker.order_events(), &state.timeline);
        let (final_bid, final_ask) = state
            .timeline
            .last()
            .map(|t| (t.best_bid, t.best_ask))
            .unwrap_or((None, None));
        let run_id = self
            .config
            .run_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "shadow-run".to_string());
        let summary = ledger.summary(run_id, final_bid, final_ask);

        let run_quality = if state.warnings.is_empty() { "ok" } else { "warnings" };
        let orders: Vec<_> = state.broker.orders().collect();
        let total_events = metrics.events_received as usize;
        let timeline_rows = state.timeline.len();

        write_jsonl(&self.config.run_dir.join("orders.jsonl"), &orders)?;
        write_jsonl(&self.config.run_dir.join("fills.jsonl"), state.broker.fills())?;
        write_jsonl(&self.config.run_dir.join("best_bid_ask.jsonl"), &state.timeline)?;
        write_jsonl(&self.config.run_dir.join("decisions.jsonl"), &state.decisions)?;
        write_jsonl(&self.config.run_dir.join("ledger.jsonl"), &ledger_events)?;
        write_jsonl(&self.config.run_dir.join("equity_curve.jsonl"), &equity_curve)?;

        let opportunities = strategy.opportunities();
        if !opportunities.is_empty() {
            write_jsonl(&self.config.run_dir.join("opportunities.jsonl"), &opportunities)?;
        }
        write_json_pretty(&self.config.run_dir.join("summary.json"), &summary)?;

        let manifest = ShadowManifest {
            base: RunManifest {
                mode: "shadow".to_string(),
                primary_asset_id: self.config.run.primary_asset_id.clone(),
                starting_cash: self.config.run.starting_cash,
                fee_rate_bps: self
                    .config
                    .run
                    .fee_rate_bps
                    .unwrap_or(crate::portfolio::ledger::DEFAULT_FEE_RATE_BPS),
                mark_method: self.config.run.mark_method.as_str().to_string(),
                strict: self.config.run.strict,
                latency_submit_ticks: self.config.run.latency.submit_ticks,
                latency_cancel_ticks: self.config.run.latency.cancel_ticks,
                total_events,
                timeline_rows,
                order_count: orders.len(),
                fill_count: state.broker.fills().len(),
                rejection_counts: strategy.rejection_counts(),
                run_quality: run_quality.to_string(),
                warnings: state.warnings.clone(),
            },
            shadow_context: self.config.shadow_context.clone(),
            run_metrics: metrics,
            exit_reason: exit_reason.clone(),
        };
        write_json_pretty(&self.config.run_dir.join("run_manifest.json"), &manifest)?;

        let meta = RunMeta {
            total_events,
            timeline_rows,
            run_quality: run_quality.to_string(),
            warnings: state.warnings.iter().take(50).cloned().collect(),
            exit_reason,
        };
        write_json_pretty(&self.config.run_dir.join("meta.json"), &meta)?;

        Ok(summary)
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ZERO_LATENCY;
    use crate::portfolio::MarkMethod;
    use crate::strategy::base::NullStrategy;
    use rust_decimal_macros::dec;

    fn book_event(seq: u64, asset_id: &str) -> Event {
        let payload = serde_json::json!({
            "bids": [{"price": "0.40", "size": "10"}],
            "asks": [{"price": "0.46", "size": "10"}],
        })
        .as_object()
        .cloned()
        .unwrap();
        Event {
            parser_version: 1,
            seq,
            ts_recv: seq as f64,
            event_type: "book".to_string(),
            asset_id: Some(asset_id.to_string()),
            payload,
        }
    }

    fn config(dir: PathBuf) -> ShadowConfig {
        let run = RunConfig {
            primary_asset_id: "asset-1".to_string(),
            starting_cash: dec!(1000),
            fee_rate_bps: None,
            mark_method: MarkMethod::Bid,
            strict: true,
            latency: ZERO_LATENCY,
        };
        ShadowConfig::new(dir, run, vec!["asset-1".to_string()])
    }

    /// Scenario (spec.md §8.6): an injected event source that stalls after
    /// 2 of 5 available events.
    /// Expected: `run_with_events` stops early, sets a non-None exit_reason
    /// derived from the stall, and still writes a complete artifact set.
    #[test]
    fn stall_after_n_events_sets_exit_reason() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("shadow-run");
        let cfg = config(run_dir.clone());
        let runner = ShadowRunner::new(cfg);
        let events: Vec<Event> = (1..=5).map(|i| book_event(i, "asset-1")).collect();
        let mut strategy = NullStrategy;
        let summary = runner.run_with_events(&mut strategy, &events, Some(2)).unwrap();
        assert_eq!(summary.starting_cash, dec!(1000));
        assert!(run_dir.join("run_manifest.json").exists());

        let manifest_text = std::fs::read_to_string(run_dir.join("run_manifest.json")).unwrap();
        assert!(manifest_text.contains("ws_stall"));

        assert!(run_dir.join("meta.json").exists());
        let meta_text = std::fs::read_to_string(run_dir.join("meta.json")).unwrap();
        assert!(meta_text.contains("ws_stall"));
    }

    /// Scenario: an injected source with no stall configured.
    /// Expected: every event is processed, exit_reason stays absent from
    /// the written manifest.
    #[test]
    fn no_stall_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("shadow-run");
        let cfg = config(run_dir.clone());
        let runner = ShadowRunner::new(cfg);
        let events: Vec<Event> = (1..=3).map(|i| book_event(i, "asset-1")).collect();
        let mut strategy = NullStrategy;
        runner.run_with_events(&mut strategy, &events, None).unwrap();
        let manifest_text = std::fs::read_to_string(run_dir.join("run_manifest.json")).unwrap();
        assert!(!manifest_text.contains("exit_reason"));

        let meta_text = std::fs::read_to_string(run_dir.join("meta.json")).unwrap();
        assert!(!meta_text.contains("exit_reason"));
    }
}
