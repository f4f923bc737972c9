//! # capq
//!
//! Urgency-ordered capture dispatcher.
//!
//! Clients submit capture requests ranked by urgency. A single dispatcher
//! loop drains the most urgent request into a bounded worker pool, and each
//! request's outcome is delivered back to its client exactly once.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod pool;
pub mod provider;
pub mod queue;
pub mod request;
pub mod telemetry;

pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherState};
pub use error::{Error, Result};
pub use model::{Image, Outcome, RequestId, Urgency};
pub use provider::{CaptureContext, CaptureError, CaptureProvider};
