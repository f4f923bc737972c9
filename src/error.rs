//! Error types for capq.

use thiserror::Error;

use crate::dispatcher::DispatcherState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker pool saturated: {limit} captures in flight")]
    Saturated { limit: usize },

    #[error("dispatcher stopped")]
    Stopped,

    #[error("request abandoned before completion")]
    Abandoned,

    #[error("invalid dispatcher transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: DispatcherState,
        to: DispatcherState,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
