//! Capture by running an external command.
//!
//! The command's stdout is the image. It runs once per request with
//! `CAPQ_REQUEST_ID` and `CAPQ_URGENCY` set in its environment.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{CaptureContext, CaptureError, CaptureProvider};
use crate::model::Image;

/// Provider that shells out to a capture command.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandCamera {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    // Relative paths resolve against the process CWD.
    fn resolved_command(&self) -> Result<PathBuf, CaptureError> {
        if self.command.is_relative() && self.command.components().count() > 1 {
            let cwd = std::env::current_dir()
                .map_err(|e| CaptureError::new(format!("cannot resolve capture command: {e}")))?;
            Ok(cwd.join(&self.command))
        } else {
            Ok(self.command.clone())
        }
    }
}

impl CaptureProvider for CommandCamera {
    fn name(&self) -> &str {
        "command"
    }

    async fn capture(&self, ctx: CaptureContext) -> Result<Image, CaptureError> {
        let command = self.resolved_command()?;

        debug!(
            request_id = %ctx.request_id,
            command = %command.display(),
            "running capture command"
        );

        let output = Command::new(&command)
            .args(&self.args)
            .env("CAPQ_REQUEST_ID", ctx.request_id.0.to_string())
            .env("CAPQ_URGENCY", ctx.urgency.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CaptureError::new(format!(
                    "failed to run capture command {}: {e}",
                    command.display()
                ))
            })?;

        if output.status.success() {
            Ok(Image::new(output.stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CaptureError::new(format!(
                "capture command exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )))
        }
    }
}
