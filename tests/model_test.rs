//! Tests for the data model and state machines.

use capq::model::{CompletionRecord, Image, Outcome, RequestId, RequestState};
use capq::pool::AdmissionPolicy;
use capq::{DispatcherState, Error};
use std::time::Duration;

#[test]
fn request_state_only_moves_forward() {
    use RequestState::*;

    assert!(Queued.can_transition_to(Dispatched));
    assert!(Queued.can_transition_to(Completed));
    assert!(Dispatched.can_transition_to(Completed));

    assert!(!Dispatched.can_transition_to(Queued));
    assert!(!Completed.can_transition_to(Queued));
    assert!(!Completed.can_transition_to(Dispatched));
    assert!(Completed.is_terminal());
    assert!(!Dispatched.is_terminal());
}

#[test]
fn dispatcher_state_transitions() {
    use DispatcherState::*;

    assert!(Idle.can_transition_to(Running));
    assert!(Idle.can_transition_to(Stopped));
    assert!(Running.can_transition_to(Stopping));
    assert!(Stopping.can_transition_to(Stopped));

    assert!(!Running.can_transition_to(Stopped));
    assert!(!Stopped.can_transition_to(Running));
    assert!(!Stopping.can_transition_to(Running));
    assert!(Stopped.is_terminal());
    assert_eq!(Stopping.to_string(), "stopping");
}

#[test]
fn admission_policy_parses_case_insensitively() {
    assert_eq!("block".parse::<AdmissionPolicy>(), Ok(AdmissionPolicy::Block));
    assert_eq!("REJECT".parse::<AdmissionPolicy>(), Ok(AdmissionPolicy::Reject));
    assert!("queue".parse::<AdmissionPolicy>().is_err());
    assert_eq!(AdmissionPolicy::default(), AdmissionPolicy::Block);
}

#[test]
fn request_id_displays_short_form() {
    let id = RequestId::new();
    let short = id.to_string();
    assert_eq!(short.len(), 8);
    assert!(id.0.to_string().starts_with(&short));
}

#[test]
fn outcome_into_result() {
    let ok = Outcome::Success(Image::new("frame"));
    assert!(ok.is_success());
    assert_eq!(ok.label(), "success");
    assert_eq!(ok.into_result().unwrap().data(), b"frame");

    let failed = Outcome::Failure("sensor timeout".to_string());
    assert_eq!(failed.label(), "failure");
    assert_eq!(failed.into_result().unwrap_err(), "sensor timeout");
}

#[test]
fn completion_record_serializes_flat() {
    let id = RequestId::new();
    let record = CompletionRecord::new(
        id,
        3,
        &Outcome::Failure("sensor timeout".to_string()),
        Duration::from_millis(42),
    );

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["urgency"], 3);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "sensor timeout");
    assert_eq!(json["bytes"], serde_json::Value::Null);
    assert_eq!(json["duration_ms"], 42);
    assert_eq!(json["request_id"], id.0.to_string());
}

#[test]
fn error_messages_are_client_facing() {
    assert_eq!(
        Error::Saturated { limit: 4 }.to_string(),
        "worker pool saturated: 4 captures in flight"
    );
    assert_eq!(Error::Stopped.to_string(), "dispatcher stopped");
    assert_eq!(
        Error::Abandoned.to_string(),
        "request abandoned before completion"
    );
    assert_eq!(
        capq::CaptureError::new("sensor timeout").to_string(),
        "sensor timeout"
    );
}
