//! Directory command parsing.
//!
//! Commands are case-sensitive and may be written with or without a leading
//! slash (`/join lobby` and `join lobby` are the same command). Anything that
//! is not a recognized command is [`Command::Text`].

/// A single line of client input, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `join <room>`. The room name is trimmed and never empty.
    Join(&'a str),
    /// `leave`
    Leave,
    /// `listrooms`
    ListRooms,
    /// `exit`
    Exit,
    /// Any other input, trimmed. Chat when the session is in a room.
    Text(&'a str),
}

impl<'a> Command<'a> {
    /// Classify one line of input.
    ///
    /// `join` without a room name is not a command and comes back as text.
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        let word = trimmed.strip_prefix('/').unwrap_or(trimmed);

        match word {
            "leave" => Self::Leave,
            "listrooms" => Self::ListRooms,
            "exit" => Self::Exit,
            _ => match word.strip_prefix("join ").map(str::trim) {
                Some(room) if !room.is_empty() => Self::Join(room),
                _ => Self::Text(trimmed),
            },
        }
    }
}
