//! Byte-stream to line framing.
//!
//! Both transports deliver raw byte chunks with no alignment guarantee: a
//! chunk may contain half a line, several lines, or a line split across a
//! `\r\n` pair.  [`LineSplitter`] buffers bytes across chunks and yields
//! complete lines, treating `\n` and `\r` both as terminators and collapsing
//! consecutive terminators so `\r\n` produces one line, not an empty extra.

/// Accumulates raw link bytes and yields complete, trimmed lines.
///
/// Bytes that do not yet form a complete line stay buffered until the next
/// [`push`](LineSplitter::push).  Invalid UTF-8 is replaced rather than
/// rejected so a corrupt byte cannot stall the whole stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feeds a chunk of link bytes and returns every line completed by it.
    ///
    /// Empty lines (including those produced by `\r\n`) are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        for i in 0..self.buf.len() {
            let b = self.buf[i];
            if b == b'\n' || b == b'\r' {
                if i > start {
                    let text = String::from_utf8_lossy(&self.buf[start..i]);
                    let text = text.trim();
                    if !text.is_empty() {
                        lines.push(text.to_string());
                    }
                }
                start = i + 1;
            }
        }
        self.buf.drain(..start);
        lines
    }

    /// Drops any partial line still buffered.  Called when the link closes
    /// so a half-received line never bleeds into the next session.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
