//! Result of one command sent over the interactive channel.

use std::time::Duration;

/// Response from a command execution.
#[derive(Debug, Clone)]
pub struct Response {
    /// The command as requested by the caller.
    pub command: String,

    /// The line actually written, including any elevation prefix.
    pub sent: String,

    /// Output with the echoed command and trailing prompt removed. In
    /// fire-and-forget mode this is the raw first output.
    pub result: String,

    /// Everything received, before cleaning.
    pub raw_result: String,

    /// Whether the elevation password was injected.
    pub elevated: bool,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

impl Response {
    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }

    /// Check if the result contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.result.contains(pattern)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}
