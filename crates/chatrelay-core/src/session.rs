//! Directory session state machine.
//!
//! One [`Session`] runs per client connection to the directory server. It
//! interprets input lines and returns actions for the driver to execute; it
//! never talks to the room directory itself.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  name   ┌───────┐  join ok   ┌────────┐
//! │ AwaitingName │────────>│ Ready │───────────>│ InRoom │<──┐ join ok
//! └──────────────┘         └───────┘<───────────└────────┘───┘
//!        │                     │        leave        │
//!        │ exit / disconnect   │ exit / disconnect   │ exit / disconnect
//!        ↓                     ↓                     ↓
//!   ┌────────┐            ┌────────┐            ┌────────┐
//!   │ Closed │            │ Closed │            │ Closed │
//!   └────────┘            └────────┘            └────────┘
//! ```
//!
//! Joining is two-phase: `join <room>` yields [`SessionAction::JoinRoom`], and
//! the state only changes once the driver reports the outcome. Switching rooms
//! joins the target first and leaves the previous room afterwards, so a
//! denied join leaves the session exactly where it was.

use crate::{
    command::Command,
    error::SessionError,
    protocol::{self, CLOSE_CONNECTION, GOODBYE, NAME_PROMPT},
};

/// Session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for the display name
    #[default]
    AwaitingName,
    /// Named, not a member of any room
    Ready,
    /// Member of exactly one room
    InRoom,
    /// Exited or disconnected
    Closed,
}

/// Actions returned by the session state machine.
///
/// The driver executes these in order:
/// - `Send`: write the line to this session's own connection
/// - `JoinRoom`: get-or-create the room, add this session as a member, then
///   report back via [`Session::join_succeeded`] or [`Session::join_failed`]
/// - `LeaveRoom`: remove this session's membership token from the room; any
///   reply about the departure comes after it
/// - `ListRooms`: send one listing row per room
/// - `Broadcast`: timestamp the text and broadcast it to the room
/// - `Close`: close the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Reply to this session only
    Send(String),

    /// Join (creating if needed) a room
    JoinRoom {
        /// Target room name
        room: String,
    },

    /// Leave a room
    LeaveRoom {
        /// Room to leave
        room: String,
    },

    /// List the active rooms back to this session
    ListRooms,

    /// Broadcast chat to every member of a room
    Broadcast {
        /// Room to broadcast to
        room: String,
        /// `"<name>: <text>"`, without the timestamp
        text: String,
    },

    /// Close the connection
    Close,
}

/// Per-connection session state machine.
///
/// Pure: no I/O and no shared state. The display name is set once and never
/// changes; the session is in at most one room at a time.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
    name: Option<String>,
    room: Option<String>,
}

impl Session {
    /// Create a session in [`SessionState::AwaitingName`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Display name. `None` until the first line arrives.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Room this session is a member of, if any.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Actions to run when the connection is first accepted.
    pub fn start(&self) -> Vec<SessionAction> {
        vec![SessionAction::Send(NAME_PROMPT.to_string())]
    }

    /// Process one line of client input.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if the session is already closed
    pub fn handle_line(&mut self, line: &str) -> Result<Vec<SessionAction>, SessionError> {
        match self.state {
            SessionState::Closed => Err(SessionError::InvalidState {
                state: self.state,
                operation: "handle_line".to_string(),
            }),
            SessionState::AwaitingName => Ok(self.handle_name(line)),
            SessionState::Ready | SessionState::InRoom => Ok(self.handle_command(line)),
        }
    }

    /// Record a completed join.
    ///
    /// Called by the driver after the session's membership token was added to
    /// `room`. If the session was in a different room, that room is left.
    pub fn join_succeeded(&mut self, room: &str, port: u16) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return vec![SessionAction::LeaveRoom { room: room.to_string() }];
        }

        let mut actions = Vec::with_capacity(4);
        if let Some(previous) = self.room.replace(room.to_string()) {
            if previous != room {
                let reply = protocol::left(&previous);
                actions.push(SessionAction::LeaveRoom { room: previous });
                actions.push(SessionAction::Send(reply));
            }
        }
        self.state = SessionState::InRoom;

        actions.push(SessionAction::Send(protocol::joined(room)));
        actions.push(SessionAction::Send(protocol::room_port(port)));
        actions
    }

    /// Record a denied join. Room membership is unchanged.
    pub fn join_failed(&self, room: &str, reason: &str) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        vec![SessionAction::Send(protocol::join_denied(room, reason))]
    }

    /// Abrupt disconnect (EOF or read error).
    ///
    /// Same cleanup as `exit`, but nothing is sent.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.state = SessionState::Closed;
        self.room.take().map(|room| SessionAction::LeaveRoom { room }).into_iter().collect()
    }

    fn handle_name(&mut self, line: &str) -> Vec<SessionAction> {
        let name = line.trim();
        if name.is_empty() {
            return vec![SessionAction::Send(NAME_PROMPT.to_string())];
        }

        tracing::debug!(name, "session named");
        self.name = Some(name.to_string());
        self.state = SessionState::Ready;
        vec![SessionAction::Send(protocol::welcome(name))]
    }

    fn handle_command(&mut self, line: &str) -> Vec<SessionAction> {
        match Command::parse(line) {
            Command::Join(room) => vec![SessionAction::JoinRoom { room: room.to_string() }],
            Command::Leave => match self.room.take() {
                Some(room) => {
                    self.state = SessionState::Ready;
                    let reply = protocol::left(&room);
                    vec![SessionAction::LeaveRoom { room }, SessionAction::Send(reply)]
                },
                None => Vec::new(),
            },
            Command::ListRooms => vec![SessionAction::ListRooms],
            Command::Exit => {
                self.state = SessionState::Closed;
                let mut actions: Vec<SessionAction> = self
                    .room
                    .take()
                    .map(|room| SessionAction::LeaveRoom { room })
                    .into_iter()
                    .collect();
                actions.push(SessionAction::Send(GOODBYE.to_string()));
                actions.push(SessionAction::Send(CLOSE_CONNECTION.to_string()));
                actions.push(SessionAction::Close);
                actions
            },
            Command::Text(text) => match (&self.room, &self.name) {
                (Some(room), Some(name)) if !text.is_empty() => vec![SessionAction::Broadcast {
                    room: room.clone(),
                    text: protocol::chat_text(name, text),
                }],
                _ => Vec::new(),
            },
        }
    }
}
