//! Standalone tape recorder binary (spec.md Component C).
//!
//! Thin wrapper around `simtrader_core::tape::recorder::record`; env-var
//! driven the way the teacher's own `main.rs` reads `Config::from_env`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use simtrader_core::tape::recorder::{record, ws_market_url_default, RecorderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ws_url = std::env::var("PM_CLOB_WS").unwrap_or_else(|_| ws_market_url_default().to_string());
    let asset_ids: Vec<String> = std::env::var("ASSET_IDS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if asset_ids.is_empty() {
        anyhow::bail!("ASSET_IDS must be set to a comma-separated list of asset ids");
    }
    let run_dir = std::env::var("RUN_DIR").unwrap_or_else(|_| "runs/recorder".to_string()).into();
    let duration_seconds: Option<f64> = std::env::var("DURATION_SECONDS").ok().and_then(|s| s.parse().ok());

    eprintln!("[RECORDER] ws={ws_url} assets={asset_ids:?} run_dir={run_dir:?}");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_ctrlc = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[RECORDER] Ctrl-C received, stopping...");
            stop_ctrlc.store(true, Ordering::Relaxed);
        }
    });

    let config = RecorderConfig { ws_url, asset_ids, run_dir, duration_seconds };
    let meta = record(config, stop).await?;
    eprintln!(
        "[RECORDER] Done: {} frames, {} events, {} reconnects",
        meta.frame_count, meta.event_count, meta.reconnect_count
    );
    Ok(())
}
