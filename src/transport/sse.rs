//! Incremental `text/event-stream` parsing.
//!
//! Used on both sides of the wire: reading the upstream chat-completions
//! stream, and reading our own `data: {json}` frames in the listening
//! client. Bytes are buffered until a full line is available, so UTF-8
//! sequences split across network reads decode correctly.
//!
//! ```text
//! event: message
//! data: {"type":"token","token":"Hi"}
//!
//! data: [DONE]
//! ```

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

impl SseFrame {
    /// Whether this frame is the OpenAI-style `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Byte-level incremental parser. Feed network reads with
/// [`push`](Self::push), then call [`finish`](Self::finish) at end of stream.
#[derive(Debug, Default)]
pub struct SseLineParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseLineParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes and return every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Dispatch whatever is left when the stream ends without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_owned();
            self.line(&line);
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn parse_all(chunks: &[&[u8]]) -> Vec<SseFrame> {
        let mut parser = SseLineParser::new();
        let mut frames: Vec<SseFrame> = chunks.iter().flat_map(|c| parser.push(c)).collect();
        frames.extend(parser.finish());
        frames
    }

    #[test]
    fn frames_split_on_blank_lines() {
        let frames = parse_all(&[b"data: one\n\ndata: two\n\n"]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].data, "two");
    }

    #[test]
    fn frame_split_across_reads() {
        let frames = parse_all(&[b"da", b"ta: {\"a\"", b":1}\n", b"\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn multibyte_split_across_reads() {
        let text = "data: caf\u{e9} \u{1F600}\n\n".as_bytes();
        let (a, b) = text.split_at(10);
        let frames = parse_all(&[a, b]);
        assert_eq!(frames[0].data, "caf\u{e9} \u{1F600}");
    }

    #[test]
    fn crlf_comments_and_event_names() {
        let frames = parse_all(&[b": keep-alive\r\nevent: message\r\ndata: hi\r\n\r\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message"));
        assert_eq!(frames[0].data, "hi");
    }

    #[test]
    fn multi_line_data_joined() {
        let frames = parse_all(&[b"data: a\ndata:b\n\n"]);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn trailing_frame_flushed_on_finish() {
        let frames = parse_all(&[b"data: [DONE]"]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_done());
    }

    #[test]
    fn comment_only_stream_is_empty() {
        assert!(parse_all(&[b": ping\n\n: ping\n\n"]).is_empty());
    }
}
