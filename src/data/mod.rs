pub mod bars;
pub mod ledger;

pub use bars::{merge_bars, BarSource, MemoryBarSource};
pub use ledger::{ExecutionLedger, LedgerRecord};

#[cfg(test)]
mod ledger_tests;
