//! Line protocol between the directory server and its clients.
//!
//! Everything on the wire is newline-delimited UTF-8. Two server lines carry
//! control meaning and are recognized by the client:
//!
//! - `ROOM_PORT:<port>` announces the port of the room the client just joined
//! - `SERVER_CLOSE_CONNECTION` marks a graceful, server-initiated close
//!
//! Chat lines are `[HH:MM:SS] <name>: <text>`. Every other line is plain
//! informational text.

/// Prefix of the room port announcement.
pub const ROOM_PORT_PREFIX: &str = "ROOM_PORT:";

/// Sent right before the server closes a connection on purpose.
pub const CLOSE_CONNECTION: &str = "SERVER_CLOSE_CONNECTION";

/// First line of every directory session.
pub const NAME_PROMPT: &str = "Enter your name:";

/// Reply to `exit`.
pub const GOODBYE: &str = "Exiting the server. Goodbye!";

/// Prefix of the line confirming a departure.
pub const LEFT_ROOM_PREFIX: &str = "Left room: ";

/// `listrooms` reply when the directory is empty.
pub const NO_ROOMS: &str = "No active rooms.";

/// Welcome line with the command summary.
pub fn welcome(name: &str) -> String {
    format!(
        "Welcome {name}! You can join a room with /join <room_name>, leave with /leave, \
         list existing chatrooms with /listrooms, exit the server with /exit, or send messages."
    )
}

/// Successful join.
pub fn joined(room: &str) -> String {
    format!("You have successfully joined the room: {room}")
}

/// Port announcement for a joined room.
pub fn room_port(port: u16) -> String {
    format!("{ROOM_PORT_PREFIX}{port}")
}

/// Confirmation that the session left a room.
pub fn left(room: &str) -> String {
    format!("{LEFT_ROOM_PREFIX}{room}")
}

/// A join that could not be completed.
pub fn join_denied(room: &str, reason: &str) -> String {
    format!("Unable to join room {room}: {reason}")
}

/// One `listrooms` row.
pub fn room_listing(room: &str, members: usize, port: u16) -> String {
    format!(" - {room} ({members} users) - PORT: {port}")
}

/// Chat body as attributed to its sender, before the timestamp is added.
pub fn chat_text(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

/// Timestamped chat line as delivered to room members.
pub fn chat_line(time: &str, body: &str) -> String {
    format!("[{time}] {body}")
}

/// A line received from the server, classified by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLine<'a> {
    /// Reconnect to this room port.
    RoomPort(u16),
    /// The server is closing the connection.
    Close,
    /// The session left this room.
    LeftRoom(&'a str),
    /// A timestamped chat line.
    Chat(&'a str),
    /// Anything else.
    Text(&'a str),
}

impl<'a> ServerLine<'a> {
    /// Classify one server line.
    ///
    /// A `ROOM_PORT:` line whose port does not parse is plain text.
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        if line == CLOSE_CONNECTION {
            return Self::Close;
        }

        if let Some(port) = line.strip_prefix(ROOM_PORT_PREFIX) {
            return match port.trim().parse() {
                Ok(port) => Self::RoomPort(port),
                Err(_) => Self::Text(line),
            };
        }

        if let Some(room) = line.strip_prefix(LEFT_ROOM_PREFIX) {
            return Self::LeftRoom(room);
        }

        if is_timestamped(line) { Self::Chat(line) } else { Self::Text(line) }
    }
}

/// `[dd:dd:dd] ` prefix check.
fn is_timestamped(line: &str) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() < 11 || bytes[0] != b'[' || bytes[9] != b']' || bytes[10] != b' ' {
        return false;
    }

    bytes[1..9]
        .iter()
        .enumerate()
        .all(|(i, b)| if i % 3 == 2 { *b == b':' } else { b.is_ascii_digit() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_port_announcement_round_trips() {
        assert_eq!(ServerLine::parse(&room_port(9026)), ServerLine::RoomPort(9026));
    }

    #[test]
    fn bad_port_is_text() {
        assert_eq!(ServerLine::parse("ROOM_PORT:abc"), ServerLine::Text("ROOM_PORT:abc"));
        assert_eq!(ServerLine::parse("ROOM_PORT:70000"), ServerLine::Text("ROOM_PORT:70000"));
    }

    #[test]
    fn close_marker_is_recognized() {
        assert_eq!(ServerLine::parse("SERVER_CLOSE_CONNECTION\r\n"), ServerLine::Close);
    }

    #[test]
    fn chat_lines_are_recognized() {
        let line = chat_line("12:34:56", &chat_text("alice", "hi"));
        assert_eq!(line, "[12:34:56] alice: hi");
        assert_eq!(ServerLine::parse(&line), ServerLine::Chat("[12:34:56] alice: hi"));
    }

    #[test]
    fn informational_lines_are_text() {
        assert_eq!(ServerLine::parse(NAME_PROMPT), ServerLine::Text(NAME_PROMPT));
        assert_eq!(ServerLine::parse("[1:2:3] nope"), ServerLine::Text("[1:2:3] nope"));
        assert_eq!(
            ServerLine::parse(" - lobby (2 users) - PORT: 9026"),
            ServerLine::Text(" - lobby (2 users) - PORT: 9026")
        );
    }

    #[test]
    fn departure_is_recognized() {
        assert_eq!(ServerLine::parse(&left("lobby")), ServerLine::LeftRoom("lobby"));
    }

    #[test]
    fn listing_format() {
        assert_eq!(room_listing("general", 3, 9027), " - general (3 users) - PORT: 9027");
    }
}
