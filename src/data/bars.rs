use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::{Bar, Timeframe};

/// Source of ordered, gap-tolerant bar series. Historical sources are
/// finite; live feeds publish bars on the event bus instead.
pub trait BarSource: Send + Sync {
    /// Bars for `symbol`/`timeframe`, ordered by open timestamp, optionally
    /// starting at `from_ts` (inclusive).
    fn next_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ts: Option<DateTime<Utc>>,
    ) -> Vec<Bar>;
}

/// In-memory bar source used by backtests and tests.
#[derive(Default)]
pub struct MemoryBarSource {
    series: Mutex<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series; bars are kept sorted by open timestamp.
    pub fn insert_series(&self, bars: Vec<Bar>) {
        let mut guard = self.series.lock().unwrap();
        for bar in bars {
            let key = (bar.symbol.clone(), bar.timeframe);
            guard.entry(key).or_default().push(bar);
        }
        for series in guard.values_mut() {
            series.sort_by_key(|b| b.open_ts);
        }
    }
}

impl BarSource for MemoryBarSource {
    fn next_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ts: Option<DateTime<Utc>>,
    ) -> Vec<Bar> {
        let guard = self.series.lock().unwrap();
        match guard.get(&(symbol.to_string(), timeframe)) {
            None => Vec::new(),
            Some(series) => series
                .iter()
                .filter(|b| from_ts.map(|ts| b.open_ts >= ts).unwrap_or(true))
                .cloned()
                .collect(),
        }
    }
}

/// Merge per-symbol series into one chronological stream.
///
/// Sorted by open timestamp with a stable tie-break on symbol name, so the
/// processing order of simultaneous bars is deterministic.
pub fn merge_bars(series: Vec<Vec<Bar>>) -> Vec<Bar> {
    let mut merged: Vec<Bar> = series.into_iter().flatten().collect();
    merged.sort_by(|a, b| a.open_ts.cmp(&b.open_ts).then_with(|| a.symbol.cmp(&b.symbol)));
    merged
}
