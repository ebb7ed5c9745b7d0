//! Client runtime error types.

use sleuth_core::SessionError;
use thiserror::Error;

/// Errors from a socket or connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A frame could not be sent.
    #[error("send failed: {0}")]
    Send(String),

    /// The socket is gone.
    #[error("socket closed")]
    Closed,
}

/// Errors from the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The session reported an unrecoverable error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The driver task has stopped.
    #[error("driver stopped")]
    Stopped,
}

impl DriverError {
    /// Returns true if this error is fatal (unrecoverable).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Session(e) => e.is_fatal(),
            Self::Stopped => true,
        }
    }
}
