//! Driver error types.
//!
//! Request-level failures never surface here: they become `error` responses
//! to the requesting session. A `DriverError` means the runtime fed the
//! driver an event that contradicts its own bookkeeping.

use std::fmt;

/// Errors returned by [`ServerDriver::process_event`](crate::ServerDriver::process_event).
#[derive(Debug)]
pub enum DriverError {
    /// Session not found in registry.
    ///
    /// A frame arrived for a session the driver never accepted or already
    /// closed. Usually a race with disconnect; the runtime drops the frame.
    SessionNotFound(u64),

    /// Session already registered.
    ///
    /// The runtime assigned a session id twice. Logic bug in the runtime.
    SessionAlreadyExists(u64),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::SessionAlreadyExists(id) => write!(f, "session already exists: {id}"),
        }
    }
}

impl std::error::Error for DriverError {}
