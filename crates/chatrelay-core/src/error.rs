//! Error types for the session state machine.
//!
//! Malformed or unknown command text is never an error: it is either routed
//! as chat or dropped. The only failure the state machine reports is being
//! driven after it has already closed.

use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur while driving a [`Session`](crate::Session).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Invalid state transition attempted.
    ///
    /// The driver fed input to a session that has already closed. This is a
    /// driver bug, the connection should have been torn down.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: String,
    },
}
