//! Client error types.

use std::io;

use thiserror::Error;

/// Errors that can occur in the line client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error (unparseable server address).
    ///
    /// Fatal. Fix the arguments and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Directory connection failed or broke.
    ///
    /// Fatal for the session; nothing is retried.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
