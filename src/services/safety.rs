//! Safety gates shared by every submission path.
//!
//! The armed flag and kill switch are the only mutable state consulted by
//! all modes. They live in an injected [`SafetyContext`] rather than module
//! globals, so each test and each session owns an independent instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Why the submission gate refused an order.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateRejection {
    #[error("not connected to broker")]
    NotConnected,

    #[error("execution not armed")]
    NotArmed,

    #[error("kill switch active: {reason}")]
    KillSwitchActive { reason: String },
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::NotConnected => "not_connected",
            GateRejection::NotArmed => "not_armed",
            GateRejection::KillSwitchActive { .. } => "kill_switch_active",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct KillSwitchActivation {
    pub reason: String,
    pub activated_by: String,
    pub activated_at: DateTime<Utc>,
}

/// Process-wide trading halt.
///
/// Lifecycle: inactive -> active (manual or automatic) -> inactive by
/// manual reset only. There is no automatic reset; a human has to clear it.
#[derive(Default)]
pub struct KillSwitch {
    active: AtomicBool,
    activation: Mutex<Option<KillSwitchActivation>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Activate. Returns false (and leaves state unchanged) when already
    /// active, so duplicate triggers don't overwrite the original reason.
    pub fn activate(&self, reason: &str, by: &str) -> bool {
        let mut guard = self.activation.lock().unwrap();
        if self.active.load(Ordering::SeqCst) {
            warn!("[KILL] already active, ignoring duplicate activation");
            return false;
        }
        *guard = Some(KillSwitchActivation {
            reason: reason.to_string(),
            activated_by: by.to_string(),
            activated_at: Utc::now(),
        });
        self.active.store(true, Ordering::SeqCst);
        warn!("[KILL] KILL SWITCH ACTIVATED by {}: {}", by, reason);
        true
    }

    /// Manual reset. Returns the activation that was cleared, if any.
    pub fn reset(&self, by: &str) -> Option<KillSwitchActivation> {
        let mut guard = self.activation.lock().unwrap();
        if !self.active.load(Ordering::SeqCst) {
            info!("[KILL] not active, nothing to reset");
            return None;
        }
        self.active.store(false, Ordering::SeqCst);
        let was = guard.take();
        if let Some(a) = &was {
            warn!(
                "[KILL] reset by {} (was activated at {} for: {})",
                by, a.activated_at, a.reason
            );
        }
        was
    }

    pub fn activation(&self) -> Option<KillSwitchActivation> {
        self.activation.lock().unwrap().clone()
    }
}

/// Connected/armed/kill-switch state consulted atomically right before
/// every submission decision.
#[derive(Default)]
pub struct SafetyContext {
    connected: AtomicBool,
    armed: AtomicBool,
    pub kill_switch: KillSwitch,
}

impl SafetyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// The submission gate. Checked in full for every order; the first
    /// failing gate names the rejection.
    pub fn check_submission_allowed(&self) -> Result<(), GateRejection> {
        if !self.is_connected() {
            return Err(GateRejection::NotConnected);
        }
        if !self.is_armed() {
            return Err(GateRejection::NotArmed);
        }
        if self.kill_switch.is_active() {
            let reason = self
                .kill_switch
                .activation()
                .map(|a| a.reason)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(GateRejection::KillSwitchActive { reason });
        }
        Ok(())
    }
}
