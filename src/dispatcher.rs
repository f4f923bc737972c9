//! The dispatcher: drains the priority queue into the worker pool.
//!
//! One loop, logically serial: wait for capacity and the next request,
//! hand it to a worker, repeat. It never waits on a capture finishing.
//! The loop is driven by a [`DispatcherState`] held in a watch channel;
//! `stop()` flips it to `Stopping`, which every wait in the loop races
//! against, and the loop exits at the next opportunity.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::model::{Image, RequestId, Urgency};
use crate::pool::{AdmissionPolicy, WorkerPool};
use crate::provider::CaptureProvider;
use crate::queue::PriorityQueue;
use crate::request::{Completion, Request, Ticket};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of the dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Built, `run()` not yet called.
    Idle,
    Running,
    /// Stop requested; finishing the current cycle and shutting down.
    Stopping,
    /// Terminal.
    Stopped,
}

impl DispatcherState {
    pub fn can_transition_to(self, to: DispatcherState) -> bool {
        use DispatcherState::*;
        matches!(
            (self, to),
            (Idle, Running) | (Idle, Stopped) | (Running, Stopping) | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DispatcherState::Stopped)
    }
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Running => "running",
            DispatcherState::Stopping => "stopping",
            DispatcherState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Shared state and client handle
// ---------------------------------------------------------------------------

struct Shared {
    queue: PriorityQueue,
    state: watch::Sender<DispatcherState>,
    in_flight: Arc<AtomicUsize>,
}

impl Shared {
    /// Atomically move `from` -> `to`.
    fn transition(&self, from: DispatcherState, to: DispatcherState) -> Result<()> {
        debug_assert!(from.can_transition_to(to));
        let mut actual = from;
        let moved = self.state.send_if_modified(|s| {
            actual = *s;
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from: actual, to })
        }
    }

    /// Close the queue and fail everything still in it.
    fn fail_pending(&self) -> usize {
        let remaining = self.queue.close();
        let count = remaining.len();
        for request in remaining {
            debug!(
                request_id = %request.id,
                urgency = request.urgency,
                "failing undispatched request"
            );
            request.completion.fail(Error::Stopped.to_string());
        }
        if count > 0 {
            metrics::requests_rejected()
                .add(count as u64, &[opentelemetry::KeyValue::new("reason", "stopped")]);
        }
        count
    }
}

/// Cloneable client-side handle: submit requests, observe, stop.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Submit a capture request with a success and a failure handler.
    ///
    /// Exactly one handler is called, once, from whichever task finishes the
    /// request. Never blocks. After the dispatcher has stopped, `on_failure`
    /// is called immediately with "dispatcher stopped".
    pub fn submit(
        &self,
        urgency: Urgency,
        on_success: impl FnOnce(Image) + Send + 'static,
        on_failure: impl FnOnce(String) + Send + 'static,
    ) -> RequestId {
        let request = Request::new(urgency, Completion::from_handlers(on_success, on_failure));
        let id = request.id;
        self.submit_request(request);
        id
    }

    /// Submit a capture request and get a future for its outcome.
    pub fn submit_ticket(&self, urgency: Urgency) -> Ticket {
        let (request, ticket) = Request::with_ticket(urgency);
        self.submit_request(request);
        ticket
    }

    /// Submit a prebuilt request.
    pub fn submit_request(&self, request: Request) {
        let (id, urgency) = (request.id, request.urgency);
        match self.shared.queue.enqueue(request) {
            Ok(()) => {
                debug!(request_id = %id, urgency, "request queued");
                metrics::requests_submitted().add(1, &[]);
            }
            Err(request) => {
                debug!(request_id = %id, urgency, "dispatcher stopped, refusing request");
                metrics::requests_rejected()
                    .add(1, &[opentelemetry::KeyValue::new("reason", "stopped")]);
                request.completion.fail(Error::Stopped.to_string());
            }
        }
    }

    /// Ask the loop to stop after its current cycle. Idempotent.
    ///
    /// Stopping a dispatcher that never ran moves it straight to `Stopped`
    /// and fails anything already queued.
    pub fn stop(&self) {
        let mut previous = DispatcherState::Idle;
        let changed = self.shared.state.send_if_modified(|s| {
            previous = *s;
            match *s {
                DispatcherState::Idle => {
                    *s = DispatcherState::Stopped;
                    true
                }
                DispatcherState::Running => {
                    *s = DispatcherState::Stopping;
                    true
                }
                DispatcherState::Stopping | DispatcherState::Stopped => false,
            }
        });
        if !changed {
            return;
        }
        info!(from = %previous, "dispatcher stop requested");
        if previous == DispatcherState::Idle {
            self.shared.fail_pending();
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.shared.state.borrow()
    }

    /// Requests waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Captures currently running.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Resolve once the dispatcher reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

enum Cycle {
    Dispatched,
    Rejected,
    Interrupted,
}

/// Owns the queue, the provider, and the dispatch loop.
pub struct Dispatcher<P> {
    handle: DispatcherHandle,
    provider: Arc<P>,
    config: DispatcherConfig,
}

impl<P: CaptureProvider> Dispatcher<P> {
    pub fn new(provider: P, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let shared = Shared {
            queue: PriorityQueue::new(),
            state: watch::Sender::new(DispatcherState::Idle),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        Ok(Self {
            handle: DispatcherHandle {
                shared: Arc::new(shared),
            },
            provider: Arc::new(provider),
            config,
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn submit(
        &self,
        urgency: Urgency,
        on_success: impl FnOnce(Image) + Send + 'static,
        on_failure: impl FnOnce(String) + Send + 'static,
    ) -> RequestId {
        self.handle.submit(urgency, on_success, on_failure)
    }

    pub fn submit_ticket(&self, urgency: Urgency) -> Ticket {
        self.handle.submit_ticket(urgency)
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn state(&self) -> DispatcherState {
        self.handle.state()
    }

    /// Run the dispatch loop until stopped.
    ///
    /// Returns `Err(InvalidTransition)` unless the dispatcher is `Idle`;
    /// a dispatcher runs at most once. On the way out every request still
    /// queued is failed with "dispatcher stopped", and in-flight captures are
    /// awaited when `drain_on_stop` is set.
    pub async fn run(&self) -> Result<()> {
        let shared = &self.handle.shared;
        shared.transition(DispatcherState::Idle, DispatcherState::Running)?;

        info!(
            provider = self.provider.name(),
            max_concurrent = self.config.max_concurrent,
            admission = %self.config.admission,
            "dispatcher started"
        );

        let mut state_rx = shared.state.subscribe();
        let mut pool = WorkerPool::new(
            Arc::clone(&self.provider),
            self.config.max_concurrent,
            Arc::clone(&shared.in_flight),
        );

        let result = loop {
            if *state_rx.borrow_and_update() != DispatcherState::Running {
                break Ok(());
            }
            pool.reap();

            let cycle = match self.config.admission {
                AdmissionPolicy::Block => self.cycle_blocking(&mut pool, &mut state_rx).await,
                AdmissionPolicy::Reject => self.cycle_rejecting(&mut pool, &mut state_rx).await,
            };

            match cycle {
                Ok(Cycle::Dispatched | Cycle::Rejected) => {}
                Ok(Cycle::Interrupted) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if let Err(ref e) = result {
            error!(error = %e, "dispatcher loop failed");
            // Let the shutdown path below run from a consistent state.
            let _ = shared.transition(DispatcherState::Running, DispatcherState::Stopping);
        }

        self.shutdown(&mut pool).await;
        result
    }

    /// Block policy: take a worker slot first, then the most urgent request.
    async fn cycle_blocking(
        &self,
        pool: &mut WorkerPool<P>,
        state_rx: &mut watch::Receiver<DispatcherState>,
    ) -> Result<Cycle> {
        let queue = &self.handle.shared.queue;

        let permit = tokio::select! {
            biased;
            _ = stop_requested(state_rx) => return Ok(Cycle::Interrupted),
            permit = pool.reserve() => permit?,
        };

        let request = tokio::select! {
            biased;
            _ = stop_requested(state_rx) => return Ok(Cycle::Interrupted),
            request = queue.dequeue() => request,
        };

        debug!(request_id = %request.id, urgency = request.urgency, "dispatching");
        pool.spawn(request, permit);
        Ok(Cycle::Dispatched)
    }

    /// Reject policy: take the most urgent request, fail it if no slot is free.
    async fn cycle_rejecting(
        &self,
        pool: &mut WorkerPool<P>,
        state_rx: &mut watch::Receiver<DispatcherState>,
    ) -> Result<Cycle> {
        let queue = &self.handle.shared.queue;

        let request = tokio::select! {
            biased;
            _ = stop_requested(state_rx) => return Ok(Cycle::Interrupted),
            request = queue.dequeue() => request,
        };

        match pool.try_reserve() {
            Some(permit) => {
                debug!(request_id = %request.id, urgency = request.urgency, "dispatching");
                pool.spawn(request, permit);
                Ok(Cycle::Dispatched)
            }
            None => {
                let reason = Error::Saturated {
                    limit: pool.limit(),
                };
                warn!(
                    request_id = %request.id,
                    urgency = request.urgency,
                    in_flight = pool.in_flight(),
                    "rejecting request: {reason}"
                );
                metrics::requests_rejected()
                    .add(1, &[opentelemetry::KeyValue::new("reason", "saturated")]);
                request.completion.fail(reason.to_string());
                Ok(Cycle::Rejected)
            }
        }
    }

    async fn shutdown(&self, pool: &mut WorkerPool<P>) {
        let shared = &self.handle.shared;

        let failed = shared.fail_pending();
        if failed > 0 {
            info!(failed, "failed undispatched requests on shutdown");
        }

        if self.config.drain_on_stop {
            pool.drain().await;
        } else {
            pool.detach();
        }

        shared.state.send_replace(DispatcherState::Stopped);
        info!("dispatcher stopped");
    }
}

/// Completes once the state leaves `Running` (or the sender is gone).
async fn stop_requested(state_rx: &mut watch::Receiver<DispatcherState>) {
    let _ = state_rx
        .wait_for(|s| *s != DispatcherState::Running)
        .await;
}
