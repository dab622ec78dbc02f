//! Fragment streams and helpers for building them

use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::Result;

/// A lazy, ordered, finite stream of text fragments.
///
/// The stream is single-consumer. Dropping it releases the underlying
/// transport, which is how callers cancel a request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Build a stream that yields the given fragments and then completes.
pub fn from_fragments<I, S>(fragments: I) -> FragmentStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<Result<String>> = fragments.into_iter().map(|s| Ok(s.into())).collect();
    Box::pin(tokio_stream::iter(items))
}

/// Splits a byte stream into complete lines, carrying partial lines over
/// between chunks. Used by newline-delimited JSON providers.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed (without terminators).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim_end_matches('\r');
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Return whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_from_fragments_preserves_order() {
        let stream = from_fragments(["a", "b", "c"]);
        let collected: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(collected, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_line_buffer_splits_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"a\":").is_empty());
        let lines = buf.push(b"1}\n{\"b\":2}\r\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf.push(b":3}").len(), 0);
        assert_eq!(buf.finish().as_deref(), Some("{\"c\":3}"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_line_buffer_skips_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\n\nx\n\n");
        assert_eq!(lines, vec!["x"]);
    }

    #[test]
    fn test_line_buffer_keeps_multibyte_chars_split_across_chunks() {
        let mut buf = LineBuffer::new();
        let bytes = "héllo\n".as_bytes();
        assert!(buf.push(&bytes[..2]).is_empty());
        assert_eq!(buf.push(&bytes[2..]), vec!["héllo"]);
    }
}
