//! Append-only execution ledger.
//!
//! One durable record per intent, submission, acknowledgement, fill,
//! rejection, error, reconciliation pass, and kill-switch event. The API
//! surface is insert-only: there is no update or delete, so prior records
//! cannot be mutated by construction.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::{Fill, Order, OrderIntent, OrderStatus, Side};
use crate::events::DriftEvent;

/// Single ledger record. Fields not relevant to the entry type stay unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: DateTime<Utc>,
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl LedgerRecord {
    fn new(entry_type: &str) -> Self {
        Self {
            ts: Utc::now(),
            entry_type: entry_type.to_string(),
            intent_id: None,
            order_id: None,
            symbol: None,
            side: None,
            size: None,
            status: None,
            reason_codes: Vec::new(),
            error: None,
            detail: Value::Null,
        }
    }
}

pub struct ExecutionLedger {
    run_id: String,
    records: Mutex<Vec<LedgerRecord>>,
    file: Mutex<Option<File>>,
    run_dir: Option<PathBuf>,
}

impl ExecutionLedger {
    /// Ledger kept entirely in memory (tests, ad-hoc runs).
    pub fn in_memory(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            records: Mutex::new(Vec::new()),
            file: Mutex::new(None),
            run_dir: None,
        }
    }

    /// Ledger backed by `<base_dir>/<run_id>/ledger.jsonl`, with the run
    /// manifest written alongside it.
    pub fn file_backed(
        base_dir: &std::path::Path,
        run_id: &str,
        manifest: &Value,
    ) -> std::io::Result<Self> {
        let run_dir = base_dir.join(run_id);
        fs::create_dir_all(&run_dir)?;

        let manifest_path = run_dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(manifest)?)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join("ledger.jsonl"))?;

        debug!("[LEDGER] initialized at {}", run_dir.display());

        Ok(Self {
            run_id: run_id.to_string(),
            records: Mutex::new(Vec::new()),
            file: Mutex::new(Some(file)),
            run_dir: Some(run_dir),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> Option<&PathBuf> {
        self.run_dir.as_ref()
    }

    fn append(&self, record: LedgerRecord) {
        if let Some(file) = self.file.lock().unwrap().as_mut() {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    if let Err(e) = writeln!(file, "{}", line) {
                        error!("[LEDGER] write failed: {}", e);
                    }
                }
                Err(e) => error!("[LEDGER] serialize failed: {}", e),
            }
        }
        self.records.lock().unwrap().push(record);
    }

    pub fn record_intent(&self, intent: &OrderIntent) {
        let mut r = LedgerRecord::new("intent");
        r.intent_id = Some(intent.intent_id);
        r.symbol = Some(intent.symbol.clone());
        r.side = Some(intent.side);
        r.size = Some(intent.requested_size);
        r.detail = serde_json::json!({
            "strategy_id": intent.strategy_id,
            "stop_loss": intent.stop_loss,
            "take_profit": intent.take_profit,
        });
        self.append(r);
        debug!("[LEDGER] intent {} for {}", intent.intent_id, intent.symbol);
    }

    pub fn record_submission(&self, order: &Order) {
        let mut r = LedgerRecord::new("submission");
        r.intent_id = Some(order.intent_id);
        r.order_id = Some(order.order_id);
        r.symbol = Some(order.symbol.clone());
        r.side = Some(order.side);
        r.size = Some(order.size);
        r.status = Some(OrderStatus::Submitted);
        self.append(r);
        debug!("[LEDGER] submitted {}", order.order_id);
    }

    pub fn record_ack(&self, order: &Order, broker_ref: &str) {
        let mut r = LedgerRecord::new("ack");
        r.intent_id = Some(order.intent_id);
        r.order_id = Some(order.order_id);
        r.status = Some(order.status);
        r.detail = serde_json::json!({ "broker_ref": broker_ref });
        self.append(r);
    }

    pub fn record_fill(&self, fill: &Fill) {
        let mut r = LedgerRecord::new("fill");
        r.order_id = Some(fill.order_id);
        r.symbol = Some(fill.symbol.clone());
        r.size = Some(fill.size);
        r.detail = serde_json::json!({
            "price": fill.price,
            "is_close": fill.is_close,
            "pnl": fill.pnl,
            "fees": fill.fees,
            "strategy_id": fill.strategy_id,
            "ts": fill.ts,
        });
        self.append(r);
    }

    pub fn record_rejection(&self, intent: &OrderIntent, code: &str, reason: &str) {
        let mut r = LedgerRecord::new("rejection");
        r.intent_id = Some(intent.intent_id);
        r.symbol = Some(intent.symbol.clone());
        r.side = Some(intent.side);
        r.size = Some(intent.requested_size);
        r.status = Some(OrderStatus::Rejected);
        r.reason_codes = vec![code.to_string()];
        r.error = Some(reason.to_string());
        self.append(r);
        debug!("[LEDGER] rejected {}: {}", intent.intent_id, reason);
    }

    pub fn record_error(&self, error_msg: &str, intent_id: Option<Uuid>, order_id: Option<Uuid>) {
        let mut r = LedgerRecord::new("error");
        r.intent_id = intent_id;
        r.order_id = order_id;
        r.error = Some(error_msg.to_string());
        self.append(r);
        error!("[LEDGER] error {}", error_msg);
    }

    pub fn record_reconciliation(
        &self,
        broker_count: usize,
        local_count: usize,
        drift: &[DriftEvent],
    ) {
        let mut r = LedgerRecord::new("reconciliation");
        r.detail = serde_json::json!({
            "broker_count": broker_count,
            "local_count": local_count,
            "drift_detected": !drift.is_empty(),
            "drift": drift,
        });
        self.append(r);
    }

    pub fn record_kill_switch(&self, activated: bool, reason: &str, by: &str) {
        let mut r = LedgerRecord::new("kill_switch");
        r.detail = serde_json::json!({
            "activated": activated,
            "reason": reason,
            "by": by,
        });
        self.append(r);
        warn!(
            "[LEDGER] kill_switch {} by {}: {}",
            if activated { "activated" } else { "reset" },
            by,
            reason
        );
    }

    /// All records so far (clone; the log itself stays append-only).
    pub fn entries(&self) -> Vec<LedgerRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn entries_of(&self, entry_type: &str) -> Vec<LedgerRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.entry_type == entry_type)
            .cloned()
            .collect()
    }

    /// Flush and stamp the manifest with an end time.
    pub fn finalize(&self) {
        if let Some(file) = self.file.lock().unwrap().as_mut() {
            let _ = file.flush();
        }
        if let Some(dir) = &self.run_dir {
            let manifest_path = dir.join("manifest.json");
            if let Ok(content) = fs::read_to_string(&manifest_path) {
                if let Ok(mut manifest) = serde_json::from_str::<Value>(&content) {
                    manifest["ended_at"] = serde_json::json!(Utc::now());
                    if let Ok(pretty) = serde_json::to_string_pretty(&manifest) {
                        if let Err(e) = fs::write(&manifest_path, pretty) {
                            error!("[LEDGER] manifest update failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}
