//! Live shadow-trading binary: drives Component K against the real WS feed.

use std::path::PathBuf;

use simtrader_core::config::EnvConfig;
use simtrader_core::shadow::{ShadowConfig, ShadowRunner};
use simtrader_core::strategy::NullStrategy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let asset_ids: Vec<String> = std::env::var("ASSET_IDS")
        .map_err(|_| anyhow::anyhow!("ASSET_IDS must be a comma-separated list of asset ids"))?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if asset_ids.is_empty() {
        anyhow::bail!("ASSET_IDS must contain at least one asset id");
    }

    let mut env = EnvConfig::from_env();
    if env.run.primary_asset_id.is_empty() {
        env.run.primary_asset_id = asset_ids[0].clone();
    }
    let mut config = ShadowConfig::new(env.run_dir, env.run, asset_ids);
    config.ws_url = env.ws_url;
    config.max_ws_stall_seconds = env.max_ws_stall_seconds;
    if let Ok(tape_dir) = std::env::var("TAPE_DIR") {
        config.tape_dir = Some(PathBuf::from(tape_dir));
    }
    if let Some(duration) = std::env::var("DURATION_SECONDS").ok().and_then(|s| s.parse().ok()) {
        config.duration_seconds = Some(duration);
    }

    eprintln!("[SHADOW] ws={} assets={:?} run_dir={:?}", config.ws_url, config.asset_ids, config.run_dir);

    let runner = ShadowRunner::new(config);
    let mut strategy = NullStrategy;
    let summary = runner.run(&mut strategy).await?;

    eprintln!(
        "[SHADOW] Done: starting_cash={} final_equity={} realized_pnl={}",
        summary.starting_cash, summary.final_equity, summary.realized_pnl
    );
    Ok(())
}
