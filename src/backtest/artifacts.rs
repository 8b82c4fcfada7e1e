//! Run artefacts: everything a completed backtest leaves on disk, keyed by
//! run id. The equity curve is written as JSON lines (append-only shape);
//! the rest as plain JSON documents.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::metrics::MetricsSummary;
use crate::backtest::portfolio::{EquityPoint, TradeRecord};
use crate::domain::{Order, Timeframe};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inputs and provenance of a run; enough to reproduce it exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub seed: u64,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub strategies: Vec<String>,
    pub initial_cash: Decimal,
    pub warmup_bars: usize,
    pub bars_processed: usize,
}

/// Per-strategy breakdown of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy_id: String,
    pub symbols_traded: Vec<String>,
    pub metrics: MetricsSummary,
    pub trades_count: usize,
    pub orders_count: usize,
}

/// Write all artefacts under `<base_dir>/<run_id>/`. Returns artefact name
/// to relative path.
#[allow(clippy::too_many_arguments)]
pub fn write_run_artifacts(
    base_dir: &Path,
    run_id: &str,
    manifest: &RunManifest,
    equity_curve: &[EquityPoint],
    trades: &[TradeRecord],
    orders: &[Order],
    metrics: &MetricsSummary,
    per_strategy: &[StrategyResult],
    warnings: &[String],
) -> std::io::Result<HashMap<String, String>> {
    let run_dir = base_dir.join(run_id);
    fs::create_dir_all(&run_dir)?;
    let mut paths = HashMap::new();

    let manifest_path = run_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(manifest)?)?;
    paths.insert("manifest".to_string(), format!("{}/manifest.json", run_id));

    let equity_path = run_dir.join("equity_curve.jsonl");
    let mut equity_file = File::create(&equity_path)?;
    for point in equity_curve {
        writeln!(equity_file, "{}", serde_json::to_string(point)?)?;
    }
    paths.insert(
        "equity_curve".to_string(),
        format!("{}/equity_curve.jsonl", run_id),
    );

    fs::write(
        run_dir.join("trades.json"),
        serde_json::to_string_pretty(trades)?,
    )?;
    paths.insert("trades".to_string(), format!("{}/trades.json", run_id));

    fs::write(
        run_dir.join("orders.json"),
        serde_json::to_string_pretty(orders)?,
    )?;
    paths.insert("orders".to_string(), format!("{}/orders.json", run_id));

    let metrics_doc = serde_json::json!({
        "combined": metrics,
        "per_strategy": per_strategy,
    });
    fs::write(
        run_dir.join("metrics.json"),
        serde_json::to_string_pretty(&metrics_doc)?,
    )?;
    paths.insert("metrics".to_string(), format!("{}/metrics.json", run_id));

    if !warnings.is_empty() {
        fs::write(
            run_dir.join("warnings.json"),
            serde_json::to_string_pretty(&serde_json::json!({ "warnings": warnings }))?,
        )?;
        paths.insert("warnings".to_string(), format!("{}/warnings.json", run_id));
    }

    Ok(paths)
}
