//! Bounded worker pool.
//!
//! Each dispatched request runs as its own tokio task holding one permit from
//! a fixed-size semaphore. The pool never holds more than `limit` captures in
//! flight; what happens to a request when every permit is taken is decided by
//! the [`AdmissionPolicy`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{Outcome, RequestState};
use crate::provider::{CaptureContext, CaptureProvider};
use crate::request::Request;
use crate::telemetry::capture::{record_outcome, record_state_transition, start_capture_span};
use crate::telemetry::metrics;

/// Behaviour when all workers are busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// The dispatcher waits for a free worker before taking the next request,
    /// so saturated load stays in the priority queue.
    #[default]
    Block,
    /// The dispatcher keeps draining; a request that finds no free worker is
    /// resolved as a failure immediately.
    Reject,
}

impl AdmissionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionPolicy::Block => "block",
            AdmissionPolicy::Reject => "reject",
        }
    }
}

impl std::fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(AdmissionPolicy::Block),
            "reject" => Ok(AdmissionPolicy::Reject),
            other => Err(format!("unknown admission policy '{other}' (expected block or reject)")),
        }
    }
}

/// A worker slot held by a running capture. Releases on drop, including
/// when the capture panics.
struct Slot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs captures for dispatched requests, at most `limit` at a time.
pub struct WorkerPool<P> {
    provider: Arc<P>,
    permits: Arc<Semaphore>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
}

impl<P: CaptureProvider> WorkerPool<P> {
    pub fn new(provider: Arc<P>, limit: usize, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            in_flight,
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Captures currently running. A slot reserved by the dispatcher but not
    /// yet given a request does not count.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for a free worker slot.
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("worker pool semaphore closed".to_string()))
    }

    /// Take a free worker slot if there is one.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    /// Start the capture for `request` on its own task. Returns immediately.
    pub fn spawn(&mut self, request: Request, permit: OwnedSemaphorePermit) {
        let span = start_capture_span(self.provider.name(), request.id, request.urgency);
        record_state_transition(&span, RequestState::Queued, RequestState::Dispatched);
        metrics::requests_dispatched().add(1, &[]);

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let slot = Slot {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        };

        let provider = Arc::clone(&self.provider);
        self.tasks
            .spawn(execute(provider, request, slot, span.clone()).instrument(span));
    }

    /// Collect finished tasks without waiting.
    pub fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_join(joined);
        }
    }

    /// Wait for every in-flight capture to finish.
    pub async fn drain(&mut self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight captures");
        }
        while let Some(joined) = self.tasks.join_next().await {
            log_join(joined);
        }
    }

    /// Let in-flight captures finish on their own, untracked.
    pub fn detach(&mut self) {
        self.tasks.detach_all();
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        // The request itself was failed by its completion's drop guard.
        Err(e) if e.is_panic() => error!(error = %e, "capture task panicked"),
        Err(e) => warn!(error = %e, "capture task cancelled"),
    }
}

async fn execute<P: CaptureProvider>(
    provider: Arc<P>,
    request: Request,
    slot: Slot,
    span: Span,
) {
    let Request {
        id,
        urgency,
        submitted_at,
        completion,
    } = request;

    let queued_ms = (chrono::Utc::now() - submitted_at).num_milliseconds();
    debug!(queued_ms, "capture started");

    let started = Instant::now();
    let result = provider
        .capture(CaptureContext {
            request_id: id,
            urgency,
        })
        .await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let outcome = match result {
        Ok(image) => {
            info!(bytes = image.len(), duration_ms, "capture succeeded");
            Outcome::Success(image)
        }
        Err(e) => {
            warn!(error = %e, duration_ms, "capture failed");
            Outcome::Failure(e.message)
        }
    };

    let provider_label = opentelemetry::KeyValue::new("provider", provider.name().to_string());
    metrics::capture_duration_ms().record(duration_ms, std::slice::from_ref(&provider_label));
    metrics::captures_completed().add(
        1,
        &[
            provider_label,
            opentelemetry::KeyValue::new("outcome", outcome.label()),
        ],
    );
    record_outcome(&span, outcome.label());
    record_state_transition(&span, RequestState::Dispatched, RequestState::Completed);

    // The slot frees before the client's handler runs.
    drop(slot);
    completion.resolve(outcome);
}
