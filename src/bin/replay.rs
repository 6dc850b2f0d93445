//! Strategy replay binary: drives Component J over a recorded tape.
//!
//! Shares `EnvConfig::from_env` with `shadow.rs`; `anyhow` carries the
//! binary-only top-level error (the library itself never uses it).

use std::path::PathBuf;

use simtrader_core::config::{load_strategy_config, EnvConfig};
use simtrader_core::strategy::{NullStrategy, StrategyRunner};

fn main() -> anyhow::Result<()> {
    let tape_path: PathBuf = std::env::var("TAPE_PATH")
        .map_err(|_| anyhow::anyhow!("TAPE_PATH must point at a recorded events.jsonl tape"))?
        .into();
    let env = EnvConfig::from_env();
    if env.run.primary_asset_id.is_empty() {
        anyhow::bail!("PRIMARY_ASSET_ID must be set");
    }

    // STRATEGY_CONFIG_PATH / STRATEGY_CONFIG_JSON are loaded and validated
    // even though this binary only ships the null strategy: a future
    // pluggable strategy reads from the same config object.
    let config_path = std::env::var("STRATEGY_CONFIG_PATH").ok().map(PathBuf::from);
    let config_json = std::env::var("STRATEGY_CONFIG_JSON").ok();
    let _strategy_config =
        load_strategy_config(config_path.as_deref(), config_json.as_deref()).map_err(anyhow::Error::from)?;

    eprintln!("[REPLAY] tape={tape_path:?} run_dir={:?} asset={}", env.run_dir, env.run.primary_asset_id);

    let runner = StrategyRunner::new(env.run_dir, env.run);
    let mut strategy = NullStrategy;
    let summary = runner.run(&tape_path, &mut strategy)?;

    eprintln!(
        "[REPLAY] Done: starting_cash={} final_equity={} realized_pnl={}",
        summary.starting_cash, summary.final_equity, summary.realized_pnl
    );
    Ok(())
}
