//! Incremental Server-Sent Events parsing for streamed chat completions
//!
//! The chat API streams `data: {...}` lines separated by blank lines and
//! terminates the stream with a `data: [DONE]` sentinel. The parser is fed
//! raw byte chunks as they arrive off the wire; chunk boundaries carry no
//! meaning, so it keeps a line buffer across calls.

/// One parsed SSE data payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseData(pub String);

impl SseData {
    /// Whether this payload is the end-of-stream sentinel
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.0.trim() == "[DONE]"
    }
}

/// Incremental SSE parser
///
/// Feed byte chunks with [`SseParser::push`]; complete `data:` payloads are
/// returned as they close. Comment lines and unknown fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    line: String,
    data_lines: Vec<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning any payloads completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
        let mut out = Vec::new();
        for ch in String::from_utf8_lossy(chunk).chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(data) = self.take_line(line) {
                    out.push(data);
                }
            } else {
                self.line.push(ch);
            }
        }
        out
    }

    /// Flush any payload still buffered when the stream ends
    pub fn finish(&mut self) -> Option<SseData> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(data) = self.take_line(line) {
                return Some(data);
            }
        }
        self.close_event()
    }

    /// Process one complete line; an empty line closes the pending event
    fn take_line(&mut self, line: &str) -> Option<SseData> {
        if line.is_empty() {
            return self.close_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn close_event(&mut self) -> Option<SseData> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(SseData(std::mem::take(&mut self.data_lines).join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_payload() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: hello\n\n");
        assert_eq!(events, vec![SseData("hello".to_string())]);
    }

    #[test]
    fn payload_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: hel").is_empty());
        let events = parser.push(b"lo\n\n");
        assert_eq!(events, vec![SseData("hello".to_string())]);
    }

    #[test]
    fn multiple_payloads_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "a");
        assert_eq!(events[1].0, "b");
    }

    #[test]
    fn crlf_lines() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: hello\r\n\r\n");
        assert_eq!(events, vec![SseData("hello".to_string())]);
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\nretry: 500\ndata: x\n\n");
        assert_eq!(events, vec![SseData("x".to_string())]);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(events, vec![SseData("one\ntwo".to_string())]);
    }

    #[test]
    fn done_sentinel() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn finish_flushes_trailing_payload() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        assert_eq!(parser.finish(), Some(SseData("tail".to_string())));
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn json_payload_with_colons() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n");
        assert_eq!(events[0].0, "{\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}");
    }
}
