//! Capture requests and their one-shot completion sink.
//!
//! A [`Completion`] accepts a single [`Outcome`]. `resolve` consumes it, so a
//! request cannot be resolved twice, and success and failure cannot both be
//! delivered. If a completion is dropped unresolved (a panicking provider, a
//! runtime shutting down) the client still hears back: the drop guard delivers
//! a failure.
//!
//! A panicking client handler is caught and logged at delivery. It never
//! unwinds into the task that resolved the request.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::Error;
use crate::model::{Image, Outcome, RequestId, Urgency};

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

enum Sink {
    Channel(oneshot::Sender<Outcome>),
    Callback(Callback),
}

impl Sink {
    fn deliver(self, outcome: Outcome) {
        match self {
            Sink::Channel(tx) => {
                if tx.send(outcome).is_err() {
                    debug!("ticket dropped before completion was delivered");
                }
            }
            Sink::Callback(f) => {
                let label = outcome.label();
                let delivered =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || f(outcome)));
                if delivered.is_err() {
                    error!(outcome = label, "completion handler panicked");
                }
            }
        }
    }
}

/// Exactly-once delivery of a request's outcome back to its client.
pub struct Completion {
    sink: Option<Sink>,
}

impl Completion {
    /// A completion whose outcome is awaited through a [`Ticket`].
    pub fn ticket(id: RequestId) -> (Self, Ticket) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Some(Sink::Channel(tx)),
            },
            Ticket { id, rx },
        )
    }

    /// A completion that calls `f` with the outcome.
    pub fn from_fn(f: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            sink: Some(Sink::Callback(Box::new(f))),
        }
    }

    /// Adapt a success/failure handler pair into a single sink.
    pub fn from_handlers(
        on_success: impl FnOnce(Image) + Send + 'static,
        on_failure: impl FnOnce(String) + Send + 'static,
    ) -> Self {
        Self::from_fn(move |outcome| match outcome {
            Outcome::Success(image) => on_success(image),
            Outcome::Failure(reason) => on_failure(reason),
        })
    }

    /// Deliver the outcome. Runs the client's handler on the calling task;
    /// a panic in the handler is logged, not propagated.
    pub fn resolve(mut self, outcome: Outcome) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(outcome);
        }
    }

    /// Shorthand for resolving with a failure reason.
    pub fn fail(self, reason: impl Into<String>) {
        self.resolve(Outcome::Failure(reason.into()));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        debug!("completion dropped unresolved, reporting abandonment");
        sink.deliver(Outcome::Failure(Error::Abandoned.to_string()));
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sink {
            Some(Sink::Channel(_)) => "channel",
            Some(Sink::Callback(_)) => "callback",
            None => "resolved",
        };
        f.debug_struct("Completion").field("sink", &kind).finish()
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Future side of a channel completion. Resolves to the request's outcome.
#[derive(Debug)]
pub struct Ticket {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl Ticket {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for Ticket {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Outcome::Failure(Error::Abandoned.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A unit of submitted work: an urgency and somewhere to send the result.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub urgency: Urgency,
    pub submitted_at: DateTime<Utc>,
    pub completion: Completion,
}

impl Request {
    pub fn new(urgency: Urgency, completion: Completion) -> Self {
        Self {
            id: RequestId::new(),
            urgency,
            submitted_at: Utc::now(),
            completion,
        }
    }

    /// A request paired with a [`Ticket`] for its outcome.
    pub fn with_ticket(urgency: Urgency) -> (Self, Ticket) {
        let id = RequestId::new();
        let (completion, ticket) = Completion::ticket(id);
        (
            Self {
                id,
                urgency,
                submitted_at: Utc::now(),
                completion,
            },
            ticket,
        )
    }
}
