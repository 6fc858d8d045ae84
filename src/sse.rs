//! Line framing for chunked HTTP bodies.
//!
//! Network chunks do not respect line boundaries (or UTF-8 boundaries), so
//! bytes are buffered until a full `\n`-terminated line is available. Used for
//! both server-sent events and newline-delimited JSON.

use thiserror::Error;

/// Longest line accepted from a peer before the body is rejected.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stream line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self { buffer: Vec::new(), max_line: MAX_LINE_BYTES }
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self { buffer: Vec::new(), max_line }
    }

    /// Appends `bytes` and returns every line completed by them, without the
    /// trailing `\n` / `\r\n`. Fails once a line, finished or not, grows
    /// past the limit; the buffered bytes are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, LineTooLong> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos > self.max_line {
                return Err(self.overflow());
            }
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        if self.buffer.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(lines)
    }

    fn overflow(&mut self) -> LineTooLong {
        self.buffer = Vec::new();
        LineTooLong { limit: self.max_line }
    }

    /// Returns the unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Payload of an SSE `data:` field, if the line is one.
pub fn data_field(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(decoder.push(b":1}\n\ndata: x\r\n").unwrap(), vec!["data: {\"a\":1}", "", "data: x"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn keeps_multibyte_characters_intact() {
        let text = "data: héllo\n".as_bytes();
        let split = text.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(&text[..split]).unwrap().is_empty());
        assert_eq!(decoder.push(&text[split..]).unwrap(), vec!["data: héllo"]);
    }

    #[test]
    fn returns_unterminated_tail_on_finish() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"{\"done\":true}").unwrap().is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn rejects_a_line_that_never_ends() {
        let mut decoder = LineDecoder::with_max_line(8);
        assert!(decoder.push(b"data: ").unwrap().is_empty());
        assert_eq!(decoder.push(b"abcdef"), Err(LineTooLong { limit: 8 }));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn rejects_an_oversized_line_inside_one_chunk() {
        let mut decoder = LineDecoder::with_max_line(4);
        assert_eq!(decoder.push(b"ok\n"), Ok(vec!["ok".to_string()]));
        assert_eq!(decoder.push(b"too long\nok\n"), Err(LineTooLong { limit: 4 }));
    }

    #[test]
    fn extracts_data_field() {
        assert_eq!(data_field("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_field("data:{}"), Some("{}"));
        assert_eq!(data_field("event: ping"), None);
        assert_eq!(data_field(": keep-alive"), None);
    }
}
