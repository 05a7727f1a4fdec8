//! Chat relay protocol core.
//!
//! Pure protocol logic for the chat relay: command parsing, the control lines
//! exchanged between server and client, and the per-connection session state
//! machine. Nothing in this crate touches a socket or a runtime.
//!
//! # Architecture
//!
//! The [`Session`] follows the action pattern. Each input line goes in,
//! a list of [`SessionAction`]s comes out, and the driver (the directory
//! server in `chatrelay-server`) executes them against the room directory and
//! the connection. Operations that need the outside world, like joining a
//! room, are requested as an action and their outcome is fed back with
//! [`Session::join_succeeded`] or [`Session::join_failed`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod protocol;
pub mod session;

pub use command::Command;
pub use error::SessionError;
pub use protocol::ServerLine;
pub use session::{Session, SessionAction, SessionState};
