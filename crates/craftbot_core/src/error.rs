//! Error types shared across the session and dispatch layers.

use crate::session::SessionState;
use std::time::Duration;

/// Errors produced by the transport session.
///
/// The supervisor only cares about one distinction: whether another attempt
/// could succeed. See [`SessionError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server rejected our credentials during login
    #[error("Credentials rejected: {0}")]
    Auth(String),

    /// Socket could not be opened, or closed underneath us
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Handshake did not complete in time
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The server sent something we could not make sense of during login
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `connect()` was called while a connection is already in progress or up
    #[error("Session is already {0}")]
    AlreadyActive(SessionState),

    /// A send was attempted outside the `Connected` state
    #[error("Session is not connected (state: {0})")]
    NotConnected(SessionState),

    /// Shutdown has been requested; no new work is accepted
    #[error("Shutdown requested")]
    Stopped,
}

impl SessionError {
    /// Whether another connection attempt could plausibly succeed.
    ///
    /// Rejected credentials will be rejected again, so they are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_) | SessionError::Timeout(_) | SessionError::Protocol(_)
        )
    }
}

/// Failure reported by a message handler.
///
/// The dispatcher logs these and carries on with the remaining handlers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler execution error: {0}")]
    Handler(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}
