//! Incremental newline framing for the chat wire protocol.
//!
//! Every frame is one line of UTF-8 text terminated by `\n`:
//!
//! ```text
//! /register alice\n
//! /status Away\n
//! hello everyone\n
//! ```
//!
//! The same decoder runs on both ends of the connection. It accumulates
//! bytes, so a line split across any number of reads still comes out
//! whole and in order.

use anyhow::{bail, Result};
use bytes::{Buf, BytesMut};

/// Line delimiter.
const DELIMITER: u8 = b'\n';

/// Incremental line decoder that handles partial reads.
///
/// Feed bytes via [`LineFramer::feed`] and take the complete lines it
/// returns. Bytes after the last newline stay buffered for the next call.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
    /// Upper bound on a buffered partial line. `None` means unbounded.
    max_line: Option<usize>,
    /// Set once a partial line has exceeded `max_line`.
    overflowed: bool,
}

impl LineFramer {
    /// Create a decoder with no line length limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that rejects partial lines longer than `max_line` bytes.
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line: Some(max_line),
            overflowed: false,
        }
    }

    /// Feed bytes into the decoder and extract all complete lines.
    ///
    /// Each line is trimmed of surrounding whitespace (so `\r\n` endings are
    /// accepted). Blank lines come out as empty strings; callers decide
    /// whether to skip them. Invalid UTF-8 is replaced rather than rejected.
    ///
    /// If the unterminated remainder exceeds the limit, the decoder is
    /// marked [overflowed](Self::is_overflowed) and its buffer dropped.
    /// Complete lines that came before the oversized one in the same call
    /// are still returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the overflow leaves no complete line to return,
    /// or on any call after the decoder has overflowed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        if self.overflowed {
            bail!("Line too long: decoder already overflowed");
        }
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
            let line = self.buf.split_to(pos);
            self.buf.advance(1); // delimiter
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }

        if let Some(max) = self.max_line {
            if self.buf.len() > max {
                let len = self.buf.len();
                self.buf.clear();
                self.overflowed = true;
                if lines.is_empty() {
                    bail!("Line too long: {len} bytes buffered without newline (max {max})");
                }
            }
        }

        Ok(lines)
    }

    /// Returns true if the decoder holds an unterminated line.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// True once a partial line has exceeded the limit.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Number of buffered bytes not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Encode one outbound line, appending the delimiter.
///
/// Embedded newlines are replaced with spaces so the text always travels
/// as exactly one frame.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 1);
    for b in text.bytes() {
        out.push(if b == b'\n' || b == b'\r' { b' ' } else { b });
    }
    out.push(DELIMITER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|chunk| framer.feed(chunk).unwrap())
            .collect()
    }

    #[test]
    fn test_single_feed_multiple_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"A\nBC\n").unwrap();
        assert_eq!(lines, vec!["A", "BC"]);
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let input = b"A\nBC\n";
        // Every way of cutting the input into two pieces, plus byte-at-a-time.
        for cut in 0..=input.len() {
            let mut framer = LineFramer::new();
            let lines = feed_all(&mut framer, &[&input[..cut], &input[cut..]]);
            assert_eq!(lines, vec!["A", "BC"], "cut at {cut}");
        }

        let mut framer = LineFramer::new();
        let singles: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(feed_all(&mut framer, &singles), vec!["A", "BC"]);
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"hel").unwrap().is_empty());
        assert!(framer.has_partial());
        assert_eq!(framer.buffered(), 3);

        let lines = framer.feed(b"lo\nwor").unwrap();
        assert_eq!(lines, vec!["hello"]);
        assert_eq!(framer.buffered(), 3);

        let lines = framer.feed(b"ld\n").unwrap();
        assert_eq!(lines, vec!["world"]);
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_blank_line_emitted_as_empty() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"\n  \nx\n").unwrap();
        assert_eq!(lines, vec!["", "", "x"]);
    }

    #[test]
    fn test_crlf_is_trimmed() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"/status Away\r\n").unwrap();
        assert_eq!(lines, vec!["/status Away"]);
    }

    #[test]
    fn test_multibyte_char_split_across_feeds() {
        let text = "caf\u{e9}\n".as_bytes();
        let mut framer = LineFramer::new();
        // Split inside the two-byte encoding of 'é'.
        assert!(framer.feed(&text[..4]).unwrap().is_empty());
        let lines = framer.feed(&text[4..]).unwrap();
        assert_eq!(lines, vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_limit_rejects_oversized_partial() {
        let mut framer = LineFramer::with_limit(8);
        assert!(framer.feed(b"12345678").unwrap().is_empty());
        let err = framer.feed(b"9").unwrap_err();
        assert!(err.to_string().contains("too long"), "unexpected error: {err}");
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_limit_keeps_complete_lines_before_oversized_one() {
        let mut framer = LineFramer::with_limit(16);
        let mut chunk = b"/status Away\n".to_vec();
        chunk.extend_from_slice(&[b'x'; 70]);

        let lines = framer.feed(&chunk).unwrap();
        assert_eq!(lines, vec!["/status Away"]);
        assert!(framer.is_overflowed());
        assert!(!framer.has_partial());
        assert!(framer.feed(b"more\n").is_err());
    }

    #[test]
    fn test_limit_allows_long_input_made_of_short_lines() {
        let mut framer = LineFramer::with_limit(4);
        let lines = framer.feed(b"abc\ndef\nghi\n").unwrap();
        assert_eq!(lines, vec!["abc", "def", "ghi"]);
    }

    #[test]
    fn test_encode_line_flattens_newlines() {
        assert_eq!(encode_line("hi"), b"hi\n".to_vec());
        assert_eq!(encode_line("a\nb\r\nc"), b"a b  c\n".to_vec());
    }
}
