//! In-process stand-in for a camera.

use std::time::Duration;
use tracing::debug;

use super::{CaptureContext, CaptureError, CaptureProvider};
use crate::model::Image;

/// Payload produced by a successful simulated capture.
pub const SIMULATED_PAYLOAD: &str = "Captured image data";

/// Waits a fixed delay, then succeeds, or fails with a fixed message if
/// configured to.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    delay: Duration,
    failure: Option<String>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl SimulatedCamera {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failure: None,
        }
    }

    /// Make every capture fail with `message` after the delay.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl CaptureProvider for SimulatedCamera {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn capture(&self, ctx: CaptureContext) -> Result<Image, CaptureError> {
        tokio::time::sleep(self.delay).await;
        debug!(
            request_id = %ctx.request_id,
            delay_ms = self.delay.as_millis() as u64,
            "simulated exposure done"
        );
        match &self.failure {
            Some(message) => Err(CaptureError::new(message.clone())),
            None => Ok(Image::new(SIMULATED_PAYLOAD)),
        }
    }
}
