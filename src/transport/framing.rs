//! Newline framing for the JSON-lines protocol
//!
//! Bytes are buffered until a `\n`; complete lines are returned and any
//! trailing fragment is kept for the next push. A trailing `\r` is stripped
//! and blank lines are skipped.

/// Lines longer than this are discarded
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Incremental line splitter
#[derive(Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every line completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = self.take_line() {
                    lines.push(line);
                }
                self.buffer.clear();
                continue;
            }
            if self.discarding {
                continue;
            }
            if self.buffer.len() >= MAX_LINE_LENGTH {
                log::warn!("Dropping oversized line (> {} bytes)", MAX_LINE_LENGTH);
                self.buffer.clear();
                self.discarding = true;
                continue;
            }
            self.buffer.push(byte);
        }
        lines
    }

    /// Bytes of the incomplete trailing fragment.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    fn take_line(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}
