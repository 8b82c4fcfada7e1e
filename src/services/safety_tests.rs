//! Kill switch and safety gate tests.

use crate::services::safety::{GateRejection, SafetyContext};

#[test]
fn kill_switch_lifecycle() {
    let safety = SafetyContext::new();
    assert!(!safety.kill_switch.is_active());

    assert!(safety.kill_switch.activate("daily loss", "risk_engine"));
    assert!(safety.kill_switch.is_active());
    let activation = safety.kill_switch.activation().unwrap();
    assert_eq!(activation.reason, "daily loss");
    assert_eq!(activation.activated_by, "risk_engine");

    // Duplicate activation is ignored and keeps the original reason.
    assert!(!safety.kill_switch.activate("other", "user"));
    assert_eq!(safety.kill_switch.activation().unwrap().reason, "daily loss");

    // Only a manual reset clears it.
    let was = safety.kill_switch.reset("user").unwrap();
    assert_eq!(was.reason, "daily loss");
    assert!(!safety.kill_switch.is_active());

    // Resetting an inactive switch is a no-op.
    assert!(safety.kill_switch.reset("user").is_none());
}

#[test]
fn gate_order_connected_armed_kill() {
    let safety = SafetyContext::new();

    assert_eq!(
        safety.check_submission_allowed().unwrap_err(),
        GateRejection::NotConnected
    );

    safety.set_connected(true);
    assert_eq!(
        safety.check_submission_allowed().unwrap_err(),
        GateRejection::NotArmed
    );

    safety.arm();
    assert!(safety.check_submission_allowed().is_ok());

    safety.kill_switch.activate("manual", "user");
    match safety.check_submission_allowed().unwrap_err() {
        GateRejection::KillSwitchActive { reason } => assert_eq!(reason, "manual"),
        other => panic!("expected kill switch rejection, got {:?}", other),
    }
}

#[test]
fn kill_switch_blocks_even_when_armed() {
    let safety = SafetyContext::new();
    safety.set_connected(true);
    safety.arm();
    safety.kill_switch.activate("manual", "user");

    // Armed state does not bypass the kill switch.
    assert!(safety.is_armed());
    assert!(safety.check_submission_allowed().is_err());
}

#[test]
fn contexts_are_independent() {
    // Injected context, not a process global: two instances never leak
    // state into each other.
    let a = SafetyContext::new();
    let b = SafetyContext::new();
    a.kill_switch.activate("manual", "user");
    assert!(a.kill_switch.is_active());
    assert!(!b.kill_switch.is_active());
}
