//! Core data model.
//!
//! A capture request is a client asking for one image. It has identity,
//! an urgency rank, and a lifecycle that only moves forward:
//! queued, dispatched, completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Urgency rank. Higher = dispatched sooner.
pub type Urgency = i32;

// ---------------------------------------------------------------------------
// Request ID
// ---------------------------------------------------------------------------

/// Newtype for capture request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// The artifact produced by a successful capture.
///
/// The payload is opaque to the dispatcher. Cloning shares the underlying
/// buffer; nothing can mutate it after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Arc<[u8]>,
    captured_at: DateTime<Utc>,
}

impl Image {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(data.into()),
            captured_at: Utc::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a request finished. Exactly one of these reaches each client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Image),
    /// Human-readable failure reason.
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> std::result::Result<Image, String> {
        match self {
            Outcome::Success(image) => Ok(image),
            Outcome::Failure(reason) => Err(reason),
        }
    }

    /// Metric / log label.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
        }
    }
}

// ---------------------------------------------------------------------------
// Request state
// ---------------------------------------------------------------------------

/// Lifecycle state of a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Owned by the priority queue.
    Queued,
    /// Handed to a worker, capture in progress.
    Dispatched,
    /// Completion delivered. Terminal.
    Completed,
}

impl RequestState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, to),
            (Queued, Dispatched)
                | (Queued, Completed) // rejected or shut down before dispatch
                | (Dispatched, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Queued => "queued",
            RequestState::Dispatched => "dispatched",
            RequestState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Completion record
// ---------------------------------------------------------------------------

/// Flat, serializable summary of a finished request, for logs and CLI output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub request_id: RequestId,
    pub urgency: Urgency,
    pub success: bool,
    /// Image size in bytes, if the capture succeeded.
    pub bytes: Option<usize>,
    /// Failure reason, if it did not.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CompletionRecord {
    pub fn new(
        request_id: RequestId,
        urgency: Urgency,
        outcome: &Outcome,
        elapsed: Duration,
    ) -> Self {
        let (bytes, error) = match outcome {
            Outcome::Success(image) => (Some(image.len()), None),
            Outcome::Failure(reason) => (None, Some(reason.clone())),
        };
        Self {
            request_id,
            urgency,
            success: outcome.is_success(),
            bytes,
            error,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}
