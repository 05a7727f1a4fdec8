//! Server error types.
//!
//! Errors are layered the same way the server is: the port allocator reports
//! [`PortError`], room construction wraps it in [`RoomError`], and the server
//! runtime folds everything into [`ServerError`]. Only a [`ServerError`] raised
//! while binding the directory listener is fatal to the process; everything
//! else is local to one room or one connection.

use std::io;

use chatrelay_core::SessionError;
use thiserror::Error;

/// Errors from the port allocator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Every port from `start` to 65535 is bound or already assigned.
    ///
    /// Not transient in any useful timeframe: rooms must close before
    /// another can be created.
    #[error("no bindable port in {start}..=65535")]
    Exhausted {
        /// First port that was tried
        start: u16,
    },
}

/// Errors from room creation.
#[derive(Debug, Error)]
pub enum RoomError {
    /// The room listener could not bind its port.
    ///
    /// Usually another process grabbed the port between the allocator's
    /// trial bind and the real one. Retryable with the next candidate port.
    #[error("failed to bind room port {port}: {source}")]
    Bind {
        /// Port that could not be bound
        port: u16,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The bound listener could not be handed to the async runtime.
    ///
    /// Raised when rooms are created outside a Tokio runtime or the runtime
    /// refuses to register the socket. Not retryable; the room is discarded.
    #[error("failed to serve room port {port}: {source}")]
    Serve {
        /// Port of the discarded listener
        port: u16,
        /// Underlying runtime or socket error
        #[source]
        source: io::Error,
    },

    /// Port allocation failed.
    #[error("port allocation failed: {0}")]
    Ports(#[from] PortError),

    /// Every bind attempt for the room raced and lost.
    ///
    /// Reported to the requesting session as a denied join. The session stays
    /// in whatever room it was in.
    #[error("could not create room '{room}' after {attempts} attempts")]
    CreationFailed {
        /// Requested room name
        room: String,
        /// Number of bind attempts made
        attempts: u32,
    },
}

impl RoomError {
    /// Returns true if creating the room again with another port may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, zero workers).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket error.
    ///
    /// Fatal when binding the directory listener, local to one connection
    /// everywhere else.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Room creation failed.
    #[error("room error: {0}")]
    Room(#[from] RoomError),

    /// Session state machine was driven out of order.
    ///
    /// Indicates a driver bug. Fatal for that connection only.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Internal error (unexpected state, logic bug).
    #[error("internal error: {0}")]
    Internal(String),
}
