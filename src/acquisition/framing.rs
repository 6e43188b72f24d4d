//! Newline framing for the probe's text stream.

/// Splits an unbounded byte stream into `\n`-terminated lines.
///
/// The unterminated tail is kept across calls and is never dropped. The remainder
/// is held as bytes so a UTF-8 sequence split across two reads decodes correctly.
#[derive(Debug, Default, Clone)]
pub struct FrameSplitter {
    remainder: Vec<u8>,
}

impl FrameSplitter {
    /// Create a splitter with an empty remainder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, trimmed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.remainder.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.remainder[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.remainder[consumed..end]);
            lines.push(line.trim().to_string());
            consumed = end + 1;
        }
        self.remainder.drain(..consumed);
        lines
    }

    /// Bytes received after the last terminator.
    pub fn pending(&self) -> &[u8] {
        &self.remainder
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.remainder.clear();
    }
}
