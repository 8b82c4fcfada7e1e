//! Ledger tests: append-only behavior and file backing.

use chrono::Utc;
use rust_decimal_macros::dec;

use crate::data::ExecutionLedger;
use crate::domain::{Fill, Order, OrderIntent, Side};

fn intent() -> OrderIntent {
    OrderIntent::new(
        "EURUSD",
        Side::Buy,
        dec!(1),
        Some(dec!(1.09)),
        None,
        "test_bot",
        Utc::now(),
    )
}

#[test]
fn records_accumulate_in_order() {
    let ledger = ExecutionLedger::in_memory("test_run");
    let i = intent();
    let order = Order::from_intent(&i);

    ledger.record_intent(&i);
    ledger.record_submission(&order);
    ledger.record_fill(&Fill {
        order_id: order.order_id,
        symbol: "EURUSD".to_string(),
        ts: Utc::now(),
        price: dec!(1.1003),
        size: dec!(1),
        is_close: false,
        pnl: None,
        fees: dec!(0),
        strategy_id: "test_bot".to_string(),
    });

    let entries = ledger.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].entry_type, "intent");
    assert_eq!(entries[1].entry_type, "submission");
    assert_eq!(entries[2].entry_type, "fill");
}

#[test]
fn entries_of_filters_by_type() {
    let ledger = ExecutionLedger::in_memory("test_run");
    let i = intent();
    ledger.record_intent(&i);
    ledger.record_rejection(&i, "missing_stop_loss", "stop loss required");
    ledger.record_kill_switch(true, "daily_loss_limit_reached", "risk_engine");

    assert_eq!(ledger.entries_of("rejection").len(), 1);
    assert_eq!(ledger.entries_of("kill_switch").len(), 1);
    assert_eq!(
        ledger.entries_of("rejection")[0].reason_codes,
        vec!["missing_stop_loss"]
    );
}

#[test]
fn file_backed_ledger_writes_jsonl_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = serde_json::json!({ "run_id": "test_run", "mode": "paper" });
    let ledger = ExecutionLedger::file_backed(dir.path(), "test_run", &manifest).unwrap();

    let i = intent();
    ledger.record_intent(&i);
    let order = Order::from_intent(&i);
    ledger.record_submission(&order);
    ledger.finalize();

    let run_dir = dir.path().join("test_run");
    let lines: Vec<String> = std::fs::read_to_string(run_dir.join("ledger.jsonl"))
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    assert_eq!(lines.len(), 2);
    // Each line round-trips as a record.
    for line in &lines {
        let parsed: crate::data::LedgerRecord = serde_json::from_str(line).unwrap();
        assert!(!parsed.entry_type.is_empty());
    }

    let manifest_content =
        std::fs::read_to_string(run_dir.join("manifest.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&manifest_content).unwrap();
    assert_eq!(parsed["run_id"], "test_run");
    assert!(parsed.get("ended_at").is_some());
}
