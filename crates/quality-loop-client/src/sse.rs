//! Incremental `event:`/`data:` frame parser.
//!
//! Bytes arrive in arbitrary chunks. Two carry-over buffers are kept: one for
//! an incomplete UTF-8 sequence at the end of a chunk and one for the trailing
//! partial line. A frame is emitted as soon as its terminating blank line is
//! seen.

use crate::errors::StreamError;
use crate::event::ParsedEvent;

/// One `event:`/`data:` pair closed by a blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn into_event(self) -> ParsedEvent {
        ParsedEvent::decode(self.event, &self.data)
    }
}

#[derive(Debug)]
pub struct FrameParser {
    utf8_carry: Vec<u8>,
    line_carry: String,
    pending_event: Option<String>,
    pending_data: Option<String>,
    max_line_bytes: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl FrameParser {
    /// Creates a parser that rejects any single line longer than `max_line_bytes`.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            utf8_carry: Vec::new(),
            line_carry: String::new(),
            pending_event: None,
            pending_data: None,
            max_line_bytes,
        }
    }

    /// Feeds one chunk and returns every event completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<ParsedEvent>, StreamError> {
        Ok(self
            .push_frames(chunk)?
            .into_iter()
            .map(SseFrame::into_event)
            .collect())
    }

    /// Feeds one chunk and returns the raw frames it completed.
    pub fn push_frames(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, StreamError> {
        let text = self.decode_utf8(chunk);
        let mut buffer = std::mem::take(&mut self.line_carry);
        buffer.push_str(&text);

        let mut frames = Vec::new();
        match buffer.rsplit_once('\n') {
            Some((complete, rest)) => {
                for raw_line in complete.split('\n') {
                    if raw_line.len() > self.max_line_bytes {
                        return Err(StreamError::FrameTooLarge {
                            limit: self.max_line_bytes,
                        });
                    }
                    if let Some(frame) = self.accept_line(raw_line.trim_end_matches('\r')) {
                        frames.push(frame);
                    }
                }
                self.line_carry = rest.to_string();
            }
            None => self.line_carry = buffer,
        }

        if self.line_carry.len() > self.max_line_bytes {
            return Err(StreamError::FrameTooLarge {
                limit: self.max_line_bytes,
            });
        }
        Ok(frames)
    }

    /// True when bytes or fields are buffered that no blank line has closed yet.
    pub fn has_partial(&self) -> bool {
        !self.utf8_carry.is_empty()
            || !self.line_carry.is_empty()
            || self.pending_event.is_some()
            || self.pending_data.is_some()
    }

    fn accept_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.pending_event.take();
            let data = self.pending_data.take();
            return match (event, data) {
                (Some(event), Some(data)) => Some(SseFrame { event, data }),
                (None, None) => None,
                (event, _) => {
                    tracing::debug!(event = ?event, "dropping incomplete frame");
                    None
                }
            };
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = field_value(line, "event") {
            self.pending_event = Some(value.to_string());
        } else if let Some(value) = field_value(line, "data") {
            // Single data line per frame; a later line replaces an earlier one.
            self.pending_data = Some(value.to_string());
        }
        None
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.utf8_carry.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.utf8_carry.len());
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.utf8_carry[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.utf8_carry.len();
                    break;
                }
                Err(err) => {
                    let valid_end = consumed + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(
                        &self.utf8_carry[consumed..valid_end],
                    ));
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + invalid_len;
                        }
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.utf8_carry.drain(..consumed);
        out
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RAW_PAYLOAD_KEY;

    const STREAM: &str = concat!(
        "event: progress\n",
        "data: {\"message\":\"Évaluation : clarté\",\"current\":1,\"total\":2}\n",
        "\n",
        "event: dimension_complete\n",
        "data: {\"dimension\":\"clarity\",\"score\":61}\n",
        "\n",
        "event: complete\n",
        "data: {\"result\":{\"iteration_number\":1,\"overall_score\":55}}\n",
        "\n",
    );

    fn feed_all(parser: &mut FrameParser, chunks: &[&[u8]]) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push_chunk(chunk).expect("push"));
        }
        events
    }

    #[test]
    fn whole_stream_yields_events_in_order() {
        let events = feed_all(&mut FrameParser::default(), &[STREAM.as_bytes()]);
        let names: Vec<_> = events.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["progress", "dimension_complete", "complete"]);
        assert_eq!(events[0].str_field("message"), Some("Évaluation : clarté"));
    }

    #[test]
    fn any_two_way_split_yields_the_same_events() {
        let bytes = STREAM.as_bytes();
        let expected = feed_all(&mut FrameParser::default(), &[bytes]);
        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            let got = feed_all(&mut FrameParser::default(), &[head, tail]);
            assert_eq!(got, expected, "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_the_same_events() {
        let bytes = STREAM.as_bytes();
        let expected = feed_all(&mut FrameParser::default(), &[bytes]);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(feed_all(&mut FrameParser::default(), &chunks), expected);
    }

    #[test]
    fn three_way_splits_yield_the_same_events() {
        let bytes = STREAM.as_bytes();
        let expected = feed_all(&mut FrameParser::default(), &[bytes]);
        for first in (0..bytes.len()).step_by(7) {
            for second in (first..=bytes.len()).step_by(5) {
                let got = feed_all(
                    &mut FrameParser::default(),
                    &[&bytes[..first], &bytes[first..second], &bytes[second..]],
                );
                assert_eq!(got, expected, "splits at {first} and {second}");
            }
        }
    }

    #[test]
    fn split_inside_multibyte_codepoint_is_not_corrupted() {
        let frame = "event: progress\ndata: {\"message\":\"naïve ✓\"}\n\n".as_bytes();
        let check = frame
            .iter()
            .position(|b| *b == 0xE2)
            .expect("check mark lead byte");
        let mut parser = FrameParser::default();
        assert!(parser.push_chunk(&frame[..check + 1]).expect("head").is_empty());
        assert!(parser.has_partial());
        let events = parser.push_chunk(&frame[check + 1..]).expect("tail");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].str_field("message"), Some("naïve ✓"));
    }

    #[test]
    fn invalid_json_yields_exactly_one_wrapped_event() {
        let mut parser = FrameParser::default();
        let events = parser
            .push_chunk(b"event: progress\ndata: {oops\n\nevent: progress\ndata: {\"message\":\"ok\"}\n\n")
            .expect("push");
        assert_eq!(events.len(), 2);
        assert!(events[0].is_malformed());
        assert_eq!(events[0].str_field(RAW_PAYLOAD_KEY), Some("{oops"));
        assert_eq!(events[1].str_field("message"), Some("ok"));
    }

    #[test]
    fn incomplete_frames_are_dropped_and_state_resets() {
        let mut parser = FrameParser::default();
        let events = parser
            .push_chunk(b"event: progress\n\ndata: {\"a\":1}\n\n\n\nevent: complete\ndata: {\"b\":2}\n\n")
            .expect("push");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "complete");
        assert!(!parser.has_partial());
    }

    #[test]
    fn crlf_lines_and_comments_are_accepted() {
        let mut parser = FrameParser::default();
        let events = parser
            .push_chunk(b": keep-alive\r\nevent:step_complete\r\ndata:{\"step\":\"x\"}\r\n\r\n")
            .expect("push");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "step_complete");
        assert_eq!(events[0].str_field("step"), Some("x"));
    }

    #[test]
    fn oversized_partial_line_is_rejected() {
        let mut parser = FrameParser::new(16);
        let err = parser
            .push_chunk(b"data: 0123456789abcdefghij")
            .expect_err("over limit");
        assert_eq!(err, StreamError::FrameTooLarge { limit: 16 });
    }
}
