//! Position reconciliation against broker truth.
//!
//! Live mode only. Every interval the reconciler fetches broker positions,
//! diffs them against the local store, classifies each difference as
//! added / removed / changed, and then overwrites local state with the
//! broker view. The broker always wins; drift is warned about and recorded,
//! never silently absorbed.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{BrokerAdapter, BrokerPosition};
use crate::bus::EventBus;
use crate::data::ExecutionLedger;
use crate::domain::Position;
use crate::error::BrokerError;
use crate::events::{DriftEvent, DriftKind, Event};

/// Local view of open positions, keyed by broker position id.
///
/// Written by the router on fills and by the reconciler; read by risk
/// snapshots and the kill-switch close-all path.
#[derive(Default)]
pub struct PositionStore {
    inner: DashMap<String, Position>,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, position: Position) {
        self.inner.insert(position.position_id.clone(), position);
    }

    pub fn remove(&self, position_id: &str) -> Option<Position> {
        self.inner.remove(position_id).map(|(_, p)| p)
    }

    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.inner.get(position_id).map(|p| p.value().clone())
    }

    pub fn all(&self) -> Vec<Position> {
        let mut positions: Vec<Position> =
            self.inner.iter().map(|p| p.value().clone()).collect();
        positions.sort_by(|a, b| a.position_id.cmp(&b.position_id));
        positions
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.iter().map(|p| p.key().clone()).collect()
    }

    /// Replace the whole view with the broker snapshot (broker is truth).
    pub fn replace_all(&self, positions: Vec<Position>) {
        self.inner.clear();
        for p in positions {
            self.inner.insert(p.position_id.clone(), p);
        }
        *self.last_updated.lock().unwrap() = Some(Utc::now());
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.lock().unwrap()
    }
}

fn to_position(bp: &BrokerPosition) -> Position {
    let mut p = Position::open(
        &bp.position_id,
        &bp.symbol,
        bp.side,
        bp.size,
        bp.entry_price,
        bp.opened_at,
        None,
        None,
        "broker",
    );
    if let Some(upl) = bp.unrealized_pnl {
        p.unrealized_pnl = upl;
    }
    p
}

/// Periodic reconciliation task.
pub struct Reconciler;

impl Reconciler {
    /// Spawn the reconciliation loop. The first pass runs immediately so a
    /// fresh connection starts from broker truth.
    pub fn spawn(
        broker: Arc<dyn BrokerAdapter>,
        store: Arc<PositionStore>,
        ledger: Arc<ExecutionLedger>,
        bus: EventBus,
        interval: std::time::Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[RECON] reconciliation started (interval: {:?})",
                interval
            );
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) =
                    Self::reconcile_once(broker.as_ref(), &store, &ledger, &bus).await
                {
                    error!("[RECON] reconciliation error: {}", e);
                }
            }
        })
    }

    /// One reconciliation pass. Returns the drift events it emitted.
    pub async fn reconcile_once(
        broker: &dyn BrokerAdapter,
        store: &PositionStore,
        ledger: &ExecutionLedger,
        bus: &EventBus,
    ) -> Result<Vec<DriftEvent>, BrokerError> {
        let broker_positions = broker.positions().await?;
        let local_count = store.count();

        let mut drift: Vec<DriftEvent> = Vec::new();
        let mut local_ids = store.ids();
        local_ids.sort();

        for bp in &broker_positions {
            match store.get(&bp.position_id) {
                None => drift.push(DriftEvent {
                    kind: DriftKind::Added,
                    position_id: bp.position_id.clone(),
                    symbol: bp.symbol.clone(),
                    local_size: None,
                    broker_size: Some(bp.size),
                }),
                Some(local) if local.size != bp.size => drift.push(DriftEvent {
                    kind: DriftKind::Changed,
                    position_id: bp.position_id.clone(),
                    symbol: bp.symbol.clone(),
                    local_size: Some(local.size),
                    broker_size: Some(bp.size),
                }),
                Some(_) => {}
            }
        }
        for id in &local_ids {
            if !broker_positions.iter().any(|bp| &bp.position_id == id) {
                if let Some(local) = store.get(id) {
                    drift.push(DriftEvent {
                        kind: DriftKind::Removed,
                        position_id: id.clone(),
                        symbol: local.symbol.clone(),
                        local_size: Some(local.size),
                        broker_size: None,
                    });
                }
            }
        }

        for event in &drift {
            warn!(
                "[RECON] drift {:?}: {} {} (local={:?}, broker={:?})",
                event.kind, event.position_id, event.symbol, event.local_size, event.broker_size
            );
            bus.publish(Event::Drift(event.clone())).ok();
        }

        // Broker view wins, unconditionally.
        store.replace_all(broker_positions.iter().map(to_position).collect());

        ledger.record_reconciliation(broker_positions.len(), local_count, &drift);

        Ok(drift)
    }
}
