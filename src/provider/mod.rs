//! Capture providers.
//!
//! A provider performs the actual capture. The dispatcher treats it as an
//! opaque, possibly slow, possibly failing operation.

pub mod command;
pub mod simulated;

pub use command::CommandCamera;
pub use simulated::SimulatedCamera;

use std::future::Future;
use thiserror::Error;

use crate::model::{Image, RequestId, Urgency};

/// A capture that did not produce an image. Displays as its message alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CaptureError {
    pub message: String,
}

impl CaptureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a provider knows about the request it is serving.
#[derive(Debug, Clone, Copy)]
pub struct CaptureContext {
    pub request_id: RequestId,
    pub urgency: Urgency,
}

/// The capture capability consumed by the dispatcher.
pub trait CaptureProvider: Send + Sync + 'static {
    /// Short name for logs and spans.
    fn name(&self) -> &str;

    fn capture(
        &self,
        ctx: CaptureContext,
    ) -> impl Future<Output = Result<Image, CaptureError>> + Send;
}
