//! Capture span helpers.
//!
//! One span per dispatched request; lifecycle transitions are recorded as
//! events inside it.

use tracing::Span;

use crate::model::{RequestId, RequestState, Urgency};

/// Start a span covering one request's capture.
///
/// `capture.outcome` is declared empty and filled in by [`record_outcome`].
pub fn start_capture_span(provider: &str, request_id: RequestId, urgency: Urgency) -> Span {
    tracing::info_span!(
        "capture.execute",
        "capture.provider" = provider,
        "capture.request_id" = %request_id,
        "capture.urgency" = urgency,
        "capture.outcome" = tracing::field::Empty,
    )
}

/// Emit a `state_transition` event scoped to `span`.
pub fn record_state_transition(span: &Span, from: RequestState, to: RequestState) {
    debug_assert!(from.can_transition_to(to), "{from} -> {to}");
    span.in_scope(|| {
        tracing::debug!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("capture.outcome", outcome);
}
