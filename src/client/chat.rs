//! Chat history
//!
//! Bounded log of incoming chat lines for the presentation layer.

use std::collections::VecDeque;

use crate::protocol::Identity;

/// Format one incoming chat message for display
pub fn format_chat_line(sender: Identity, text: &str) -> String {
    format!("Player {}: {}", sender, text)
}

/// Most recent chat lines, oldest dropped first
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<String>,
    max_lines: usize,
    received: u64,
}

impl ChatLog {
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines,
            received: 0,
        }
    }

    /// Record a chat message from `sender`
    pub fn push_chat(&mut self, sender: Identity, text: &str) {
        self.push_line(format_chat_line(sender, text));
    }

    pub fn push_line(&mut self, line: String) {
        while self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.received += 1;
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// All kept lines, oldest first, one per line
    pub fn render(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines pushed over the log's lifetime, including ones since dropped
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Lines pushed after the first `seen`, oldest first. Lines already
    /// dropped from the log are skipped.
    pub fn since(&self, seen: u64) -> impl Iterator<Item = &str> {
        let unseen = self.received.saturating_sub(seen).min(self.lines.len() as u64) as usize;
        self.lines.iter().skip(self.lines.len() - unseen).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keeps_most_recent_lines() {
        let mut log = ChatLog::new(2);
        log.push_chat(1, "first");
        log.push_chat(2, "second");
        log.push_chat(1, "third");

        assert_eq!(log.len(), 2);
        assert_eq!(log.render(), "Player 2: second\nPlayer 1: third");
    }

    #[test]
    fn test_empty_render() {
        let log = ChatLog::new(2);
        assert!(log.is_empty());
        assert_eq!(log.render(), "");
    }

    #[test]
    fn test_zero_capacity_keeps_one_line() {
        let mut log = ChatLog::new(0);
        log.push_chat(3, "a");
        log.push_chat(3, "b");
        assert_eq!(log.render(), "Player 3: b");
    }

    #[test]
    fn test_repeated_lines_are_counted() {
        let mut log = ChatLog::new(2);
        log.push_chat(1, "gg");
        log.push_chat(1, "gg");
        let seen = log.received();
        let before = log.render();

        log.push_chat(1, "gg");
        assert_eq!(log.render(), before);
        assert_eq!(log.since(seen).collect::<Vec<_>>(), vec!["Player 1: gg"]);
        assert_eq!(log.since(log.received()).count(), 0);
    }

    #[test]
    fn test_since_skips_dropped_lines() {
        let mut log = ChatLog::new(2);
        for text in ["a", "b", "c", "d"] {
            log.push_chat(1, text);
        }
        assert_eq!(log.received(), 4);
        assert_eq!(
            log.since(0).collect::<Vec<_>>(),
            vec!["Player 1: c", "Player 1: d"]
        );
    }
}
