// src/child/framing.rs

use crate::config::Newline;

/// Splits a raw chunk stream into complete lines.
///
/// Chunks arrive at arbitrary boundaries (whatever a pipe read returned), so
/// the delimiter buffers everything after the last newline and only yields
/// complete lines. A `crlf` sequence split across two chunks is handled by
/// the carried buffer.
///
/// Data that never gets terminated stays in the partial buffer; the
/// scheduler's timeout path deals with it.
#[derive(Debug)]
pub struct LineDelimiter {
    newline: Newline,
    buf: String,
}

impl LineDelimiter {
    pub fn new(newline: Newline) -> Self {
        Self {
            newline,
            buf: String::new(),
        }
    }

    /// Feed a chunk, returning every line completed by it (without the
    /// newline sequence).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);

        let sep = self.newline.as_str();
        let mut lines = Vec::new();

        while let Some(ix) = self.buf.find(sep) {
            let line = self.buf[..ix].to_string();
            self.buf.drain(..ix + sep.len());
            lines.push(line);
        }

        lines
    }

    /// Unterminated data currently held back.
    pub fn partial(&self) -> &str {
        &self.buf
    }

    /// Drop buffered state between tasks.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_keeps_partial() {
        let mut d = LineDelimiter::new(Newline::Lf);

        assert_eq!(d.push("HELLO\nPA"), vec!["HELLO".to_string()]);
        assert_eq!(d.partial(), "PA");
        assert_eq!(d.push("SS\n"), vec!["PASS".to_string()]);
        assert_eq!(d.partial(), "");
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut d = LineDelimiter::new(Newline::Lf);
        assert_eq!(
            d.push("a\nb\nc\n"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut d = LineDelimiter::new(Newline::Crlf);

        assert_eq!(d.push("one\r"), Vec::<String>::new());
        assert_eq!(d.push("\ntwo\r\n"), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn lone_lf_is_not_a_crlf_boundary() {
        let mut d = LineDelimiter::new(Newline::Crlf);
        assert_eq!(d.push("a\nb\r\n"), vec!["a\nb".to_string()]);
    }
}
