//! Strategy runner: replay orchestrator driving components A–I end to end
//! (spec.md §4.J).
//!
//! Grounded jointly on `replay/runner.py` (tape loading, per-asset book
//! creation, timeline-row emission rule, `meta.json` shape) and
//! `shadow/runner.py`'s `run()` method body (strategy `on_start`/
//! `on_finish` call sites, ledger construction, guaranteed initial/final
//! rows, `run_quality` derivation). The per-event pipeline below —
//! apply → context → strategy call → intent execution → broker step (per
//! touched asset) → fill dispatch → open-orders refresh → timeline append
//! — is exactly what `shadow/runner.py`'s imported-but-unread
//! `_process_one_event` helper is named for; it's built here directly from
//! spec.md §4.J's numbered steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::{parse_price_changes, L2Book};
use crate::broker::{LatencyConfig, Order, SimBroker};
use crate::error::RunError;
use crate::portfolio::{MarkMethod, PortfolioLedger};
use crate::strategy::base::{EventContext, OrderIntent, Strategy};
use crate::tape::loader::load_events;
use crate::tape::schema::Event;
use crate::timeline::TimelineRow;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub primary_asset_id: String,
    pub starting_cash: Decimal,
    pub fee_rate_bps: Option<Decimal>,
    pub mark_method: MarkMethod,
    pub strict: bool,
    pub latency: LatencyConfig,
}

/// One row of `decisions.jsonl`: the intents a strategy returned for an
/// event, alongside enough context to reconstruct why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    pub seq: u64,
    pub ts_recv: f64,
    pub event_type: String,
    pub intents: Vec<OrderIntent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub mode: String,
    pub primary_asset_id: String,
    pub starting_cash: Decimal,
    pub fee_rate_bps: Decimal,
    pub mark_method: String,
    pub strict: bool,
    pub latency_submit_ticks: u64,
    pub latency_cancel_ticks: u64,
    pub total_events: usize,
    pub timeline_rows: usize,
    pub order_count: usize,
    pub fill_count: usize,
    pub rejection_counts: HashMap<String, u64>,
    pub run_quality: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub total_events: usize,
    pub timeline_rows: usize,
    pub run_quality: String,
    pub warnings: Vec<String>,
    /// Set only by the shadow runner, when a stall or signal cut the run
    /// short before the feed ended on its own.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_reason: Option<String>,
}

/// Internal per-event working state, threaded through the pipeline helper
/// functions below rather than held as `&mut self` fields, so the shadow
/// runner (Component K) can reuse the identical step logic against a live
/// event source.
pub(crate) struct ReplayState {
    pub books: HashMap<String, L2Book>,
    pub broker: SimBroker,
    pub open_orders: HashMap<String, Order>,
    pub timeline: Vec<TimelineRow>,
    pub decisions: Vec<DecisionRow>,
    pub warnings: Vec<String>,
}

impl ReplayState {
    pub fn new(latency: LatencyConfig) -> Self {
        Self {
            books: HashMap::new(),
            broker: SimBroker::new(latency),
            open_orders: HashMap::new(),
            timeline: Vec::new(),
            decisions: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

pub struct StrategyRunner {
    run_dir: PathBuf,
    config: RunConfig,
}

impl StrategyRunner {
    pub fn new(run_dir: PathBuf, config: RunConfig) -> Self {
        Self { run_dir, config }
    }

    pub fn run(&self, tape_path: &Path, strategy: &mut dyn Strategy) -> Result<crate::portfolio::PortfolioSummary, RunError> {
        std::fs::create_dir_all(&self.run_dir)?;

        let loaded = load_events(tape_path)?;
        let mut state = ReplayState::new(self.config.latency);
        state.warnings.extend(loaded.warnings.clone());

        strategy.on_start(&self.config.primary_asset_id, self.config.starting_cash);

        for event in &loaded.events {
            process_one_event(&self.config, &mut state, event, strategy)?;
        }

        strategy.on_finish();

        let mut ledger = PortfolioLedger::new(
            self.config.starting_cash,
            self.config.fee_rate_bps,
            self.config.mark_method,
        );
        let (ledger_events, equity_curve) = ledger.process(state.broker.order_events(), &state.timeline);

        let (final_bid, final_ask) = state
            .timeline
            .last()
            .map(|t| (t.best_bid, t.best_ask))
            .unwrap_or((None, None));
        let run_id = self
            .run_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "run".to_string());
        let summary = ledger.summary(run_id, final_bid, final_ask);

        let run_quality = if state.warnings.is_empty() { "ok" } else { "warnings" };

        let orders: Vec<&Order> = state.broker.orders().collect();
        crate::artifact::write_jsonl(&self.run_dir.join("orders.jsonl"), &orders)?;
        crate::artifact::write_jsonl(&self.run_dir.join("fills.jsonl"), state.broker.fills())?;
        crate::artifact::write_jsonl(&self.run_dir.join("best_bid_ask.jsonl"), &state.timeline)?;
        crate::artifact::write_jsonl(&self.run_dir.join("decisions.jsonl"), &state.decisions)?;
        crate::artifact::write_jsonl(&self.run_dir.join("ledger.jsonl"), &ledger_events)?;
        crate::artifact::write_jsonl(&self.run_dir.join("equity_curve.jsonl"), &equity_curve)?;

        let opportunities = strategy.opportunities();
        if !opportunities.is_empty() {
            crate::artifact::write_jsonl(&self.run_dir.join("opportunities.jsonl"), &opportunities)?;
        }

        crate::artifact::write_json_pretty(&self.run_dir.join("summary.json"), &summary)?;

        let manifest = RunManifest {
            mode: "replay".to_string(),
            primary_asset_id: self.config.primary_asset_id.clone(),
            starting_cash: self.config.starting_cash,
            fee_rate_bps: self.config.fee_rate_bps.unwrap_or(crate::portfolio::ledger::DEFAULT_FEE_RATE_BPS),
            mark_method: self.config.mark_method.as_str().to_string(),
            strict: self.config.strict,
            latency_submit_ticks: self.config.latency.submit_ticks,
            latency_cancel_ticks: self.config.latency.cancel_ticks,
            total_events: loaded.events.len(),
            timeline_rows: state.timeline.len(),
            order_count: orders.len(),
            fill_count: state.broker.fills().len(),
            rejection_counts: strategy.rejection_counts(),
            run_quality: run_quality.to_string(),
            warnings: state.warnings.clone(),
        };
        crate::artifact::write_json_pretty(&self.run_dir.join("run_manifest.json"), &manifest)?;

        let meta = RunMeta {
            total_events: loaded.events.len(),
            timeline_rows: state.timeline.len(),
            run_quality: run_quality.to_string(),
            warnings: state.warnings.iter().take(50).cloned().collect(),
            exit_reason: None,
        };
        crate::artifact::write_json_pretty(&self.run_dir.join("meta.json"), &meta)?;

        Ok(summary)
    }
}

/// Apply one tape event through the full pipeline: book update, strategy
/// call, intent execution, broker step, fill dispatch, timeline append.
/// Shared verbatim by the strategy runner and the shadow runner.
pub(crate) fn process_one_event(
    config: &RunConfig,
    state: &mut ReplayState,
    event: &Event,
    strategy: &mut dyn Strategy,
) -> Result<(), RunError> {
    let is_book_affecting = event.event_type().map(|t| t.is_book_affecting()).unwrap_or(false);
    let mut touched_assets: Vec<String> = Vec::new();

    let is_batched = event.event_type() == Some(crate::tape::schema::EventType::PriceChange)
        && event.payload.contains_key("price_changes");

    if is_batched {
        for change in parse_price_changes(&event.payload) {
            let Some(asset_id) = change.asset_id.clone() else { continue };
            let book = state
                .books
                .entry(asset_id.clone())
                .or_insert_with(|| L2Book::new(asset_id.clone(), config.strict));
            book.apply_single_delta(&change)?;
            if !touched_assets.contains(&asset_id) {
                touched_assets.push(asset_id);
            }
        }
    } else {
        let asset_id = event.asset_id.clone().unwrap_or_else(|| config.primary_asset_id.clone());
        let book = state
            .books
            .entry(asset_id.clone())
            .or_insert_with(|| L2Book::new(asset_id.clone(), config.strict));
        let applied = book.apply(event)?;
        if applied {
            touched_assets.push(asset_id);
        }
    }

    // One timeline row per (asset, book-affecting event) touched this
    // step — Open Question (b)'s resolution (DESIGN.md).
    if is_book_affecting {
        for asset_id in &touched_assets {
            if let Some(book) = state.books.get(asset_id) {
                state.timeline.push(TimelineRow {
                    seq: event.seq,
                    ts_recv: event.ts_recv,
                    asset_id: asset_id.clone(),
                    event_type: event.event_type.clone(),
                    best_bid: book.best_bid(),
                    best_ask: book.best_ask(),
                });
            }
        }
    }

    let best_by_asset: HashMap<String, (Option<Decimal>, Option<Decimal>)> = state
        .books
        .iter()
        .map(|(id, b)| (id.clone(), (b.best_bid(), b.best_ask())))
        .collect();
    let (primary_bid, primary_ask) = best_by_asset
        .get(&config.primary_asset_id)
        .copied()
        .unwrap_or((None, None));

    let ctx = EventContext {
        event: &event.payload,
        seq: event.seq,
        ts_recv: event.ts_recv,
        best_bid: primary_bid,
        best_ask: primary_ask,
        best_by_asset: &best_by_asset,
        open_orders: &state.open_orders,
    };
    let intents = strategy.on_event(&ctx);

    if !intents.is_empty() {
        state.decisions.push(DecisionRow {
            seq: event.seq,
            ts_recv: event.ts_recv,
            event_type: event.event_type.clone(),
            intents: intents.clone(),
        });
    }

    for intent in &intents {
        execute_intent(state, event.seq, event.ts_recv, intent);
    }

    for asset_id in &touched_assets {
        if let Some(book) = state.books.get(asset_id) {
            let fills = state.broker.step(event.seq, event.ts_recv, is_book_affecting, book, Some(asset_id.as_str()));
            for fill in &fills {
                if fill.fill_size > Decimal::ZERO {
                    strategy.on_fill(fill);
                }
            }
        }
    }

    state.open_orders = state.broker.open_orders();

    Ok(())
}

fn execute_intent(state: &mut ReplayState, seq: u64, ts_recv: f64, intent: &OrderIntent) {
    match intent {
        OrderIntent::Submit { asset_id, side, limit_price, size, .. } => {
            if let Err(e) = state.broker.submit_order(asset_id.clone(), *side, *limit_price, *size, seq, ts_recv, None) {
                let warning = format!("strategy_malformed_intent: submit rejected: {}", e);
                eprintln!("[RUNNER] {}", warning);
                state.warnings.push(warning);
            }
        }
        OrderIntent::Cancel { order_id, .. } => {
            if let Err(e) = state.broker.cancel_order(order_id, seq, ts_recv) {
                let warning = format!("strategy_malformed_intent: cancel rejected: {}", e);
                eprintln!("[RUNNER] {}", warning);
                state.warnings.push(warning);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ZERO_LATENCY;
    use crate::book::Side;
    use crate::strategy::base::Opportunity;
    use rust_decimal_macros::dec;
    use std::io::Write;

    /// A strategy that submits one BUY on the very first event and never
    /// trades again — enough to exercise the full pipeline end to end.
    struct BuyOnceStrategy {
        submitted: bool,
    }

    impl Strategy for BuyOnceStrategy {
        fn on_start(&mut self, _primary_asset_id: &str, _starting_cash: Decimal) {}

        fn on_event(&mut self, ctx: &EventContext<'_>) -> Vec<OrderIntent> {
            if !self.submitted && ctx.best_ask.is_some() {
                self.submitted = true;
                return vec![OrderIntent::Submit {
                    asset_id: "asset-1".to_string(),
                    side: Side::Buy,
                    limit_price: dec!(0.50),
                    size: dec!(50),
                    reason: None,
                    meta: None,
                }];
            }
            Vec::new()
        }

        fn on_fill(&mut self, _fill: &crate::broker::FillRecord) {}
        fn on_finish(&mut self) {}
        fn opportunities(&self) -> Vec<Opportunity> {
            Vec::new()
        }
    }

    /// Scenario (spec.md §8.1): tape has a single `book` snapshot with
    /// bids=[(0.44,100)] asks=[(0.46,100)]; a strategy submits BUY
    /// limit=0.50 size=50 on that very event.
    /// Expected: the runner fills the order at 0.46 for size 50,
    /// full-status, and writes all artifacts without error.
    #[test]
    fn end_to_end_fill_at_better_price() {
        let dir = tempfile::tempdir().unwrap();
        let tape_path = dir.path().join("events.jsonl");
        let mut f = std::fs::File::create(&tape_path).unwrap();
        writeln!(
            f,
            r#"{{"parser_version":1,"seq":1,"ts_recv":1.0,"event_type":"book","asset_id":"asset-1","bids":[{{"price":"0.44","size":"100"}}],"asks":[{{"price":"0.46","size":"100"}}]}}"#
        )
        .unwrap();

        let run_dir = dir.path().join("run");
        let config = RunConfig {
            primary_asset_id: "asset-1".to_string(),
            starting_cash: dec!(1000),
            fee_rate_bps: None,
            mark_method: MarkMethod::Bid,
            strict: true,
            latency: ZERO_LATENCY,
        };
        let runner = StrategyRunner::new(run_dir.clone(), config);
        let mut strategy = BuyOnceStrategy { submitted: false };
        let summary = runner.run(&tape_path, &mut strategy).unwrap();

        assert!(run_dir.join("fills.jsonl").exists());
        assert!(run_dir.join("ledger.jsonl").exists());
        assert_eq!(summary.starting_cash, dec!(1000));
    }
}
