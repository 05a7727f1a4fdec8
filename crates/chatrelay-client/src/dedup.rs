//! Chat de-duplication across the directory and room connections.
//!
//! While a feed is open, every chat line can arrive twice: once on the
//! directory connection and once on the feed. Whichever copy arrives first is
//! printed and remembered; the matching copy from the other connection is
//! swallowed. A line that only ever arrives on one connection is still
//! printed exactly once.

use std::collections::VecDeque;

/// Unmatched lines remembered per connection.
const WINDOW: usize = 256;

/// Connection a chat line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// The directory connection
    Directory,
    /// The room feed
    Feed,
}

/// Pairs up chat lines seen on both connections.
#[derive(Debug, Default)]
pub(crate) struct ChatDedup {
    from_directory: VecDeque<String>,
    from_feed: VecDeque<String>,
}

impl ChatDedup {
    /// Whether `line` from `source` should be printed.
    pub(crate) fn admit(&mut self, source: Source, line: &str) -> bool {
        let (seen, other) = match source {
            Source::Directory => (&mut self.from_directory, &mut self.from_feed),
            Source::Feed => (&mut self.from_feed, &mut self.from_directory),
        };

        if let Some(pos) = other.iter().position(|pending| pending == line) {
            other.remove(pos);
            return false;
        }

        if seen.len() == WINDOW {
            seen.pop_front();
        }
        seen.push_back(line.to_string());
        true
    }

    /// Forget everything; called whenever the feed is opened or dropped.
    pub(crate) fn reset(&mut self) {
        self.from_directory.clear();
        self.from_feed.clear();
    }
}
