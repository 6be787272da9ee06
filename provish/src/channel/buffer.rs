//! Output buffer with a movable classification window.
//!
//! Everything a command prints is kept for the final response, but
//! classification only looks at the part received since the last `mark`
//! (a password injection or a resend), and only at the last `search_depth`
//! bytes of that. Large outputs therefore cost O(search_depth) per read.

use std::borrow::Cow;

/// Accumulated command output.
#[derive(Debug)]
pub struct OutputBuffer {
    /// Everything received for the current command.
    buffer: Vec<u8>,

    /// Start of the classification window.
    mark: usize,

    /// How many bytes from the end to classify.
    search_depth: usize,
}

impl OutputBuffer {
    /// Create a new buffer classifying at most `search_depth` trailing bytes.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            mark: 0,
            search_depth,
        }
    }

    /// Append newly received data.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Move the window start to the current end of the buffer.
    pub fn mark(&mut self) {
        self.mark = self.buffer.len();
    }

    /// Everything received since the last mark.
    pub fn window(&self) -> &[u8] {
        &self.buffer[self.mark..]
    }

    /// The tail of the window used for classification.
    pub fn search_tail(&self) -> &[u8] {
        let window = self.window();
        let start = window.len().saturating_sub(self.search_depth);
        &window[start..]
    }

    /// The whole buffer as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(65_536)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"Hello, ");
        buffer.extend(b"world!");
        assert_eq!(buffer.window(), b"Hello, world!");
        assert_eq!(buffer.len(), 13);
    }

    #[test]
    fn test_mark_moves_window() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"[sudo] password for bob: ");
        buffer.mark();
        assert!(buffer.window().is_empty());
        assert!(!buffer.is_empty());

        buffer.extend(b"\r\nok\r\n$ ");
        assert_eq!(buffer.window(), b"\r\nok\r\n$ ");
        assert!(buffer.as_str_lossy().starts_with("[sudo]"));
    }

    #[test]
    fn test_search_tail_is_bounded() {
        let mut buffer = OutputBuffer::new(10);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\n$ ");
        assert_eq!(buffer.search_tail().len(), 10);
        assert!(buffer.search_tail().ends_with(b"\n$ "));
    }
}
