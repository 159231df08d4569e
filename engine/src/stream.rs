//! Chat Stream Decoder
//!
//! The chat endpoint answers with a chunked body of newline-delimited
//! records. Lines prefixed with `data: ` carry JSON events; the literal
//! `[DONE]` marker and anything unparseable are ignored. The decoder is fed
//! raw byte chunks exactly as the transport delivers them and reassembles
//! lines across chunk boundaries, so transport framing never leaks into
//! event framing.
//!
//! # Design Philosophy
//!
//! The decoder is deliberately forgiving. An unparseable line produces no
//! event instead of an error, and the end of the connection - not the
//! `finish` event - is what finalizes the reply. A stream cut off mid-reply
//! still yields its partial text.

use serde::Deserialize;
use tracing::trace;

/// Prefix marking event lines.
const EVENT_MARKER: &str = "data: ";
/// Terminator token some deployments send before closing the connection.
const DONE_SENTINEL: &str = "[DONE]";

/// Wire shape of one event line, after the `data: ` marker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireEvent {
    Start,
    StartStep,
    TextStart {
        #[serde(default)]
        id: Option<String>,
    },
    TextDelta {
        #[serde(default)]
        id: Option<String>,
        delta: String,
    },
    TextEnd {
        #[serde(default)]
        id: Option<String>,
    },
    FinishStep,
    Finish,
}

/// Decoded stream event, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The reply stream opened.
    Started,
    /// A reply step began.
    StepStarted,
    /// A text segment opened.
    TextStarted {
        /// Segment id, when the service provided one.
        id: Option<String>,
    },
    /// A text fragment arrived.
    TextDelta {
        /// Segment id, when provided.
        id: Option<String>,
        /// The fragment itself.
        delta: String,
        /// Accumulated reply text including this fragment.
        text: String,
    },
    /// The text segment closed.
    TextEnded {
        /// Segment id, when provided.
        id: Option<String>,
    },
    /// A reply step completed.
    StepFinished,
    /// The service marked the reply finished.
    Finished,
}

/// Incremental decoder for one chat reply stream.
///
/// Feed transport chunks with [`feed`], flush with [`finish`] once the
/// connection closes, then take the reply with [`into_text`]. One decoder
/// serves one send; it is not reused.
///
/// [`feed`]: StreamDecoder::feed
/// [`finish`]: StreamDecoder::finish
/// [`into_text`]: StreamDecoder::into_text
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of the trailing incomplete line.
    buffer: Vec<u8>,
    /// Accumulated reply text.
    text: String,
    /// Id of the open text segment, when the service provided one.
    segment: Option<String>,
}

impl StreamDecoder {
    /// Fresh decoder with empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one transport chunk, returning the events it completed.
    ///
    /// A chunk may complete zero, one, or many lines; an incomplete
    /// trailing line stays buffered for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush after the connection closed: decodes a trailing unterminated
    /// line, if any.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    /// Reply text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Final accumulated reply text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    /// Id of the open text segment, when the service provided one.
    #[must_use]
    pub fn current_segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        // A complete line never splits a UTF-8 sequence; a line that still
        // fails conversion is dropped like any other malformed line.
        let line = std::str::from_utf8(raw).ok()?;
        let line = line.strip_suffix('\r').unwrap_or(line);
        let payload = line.strip_prefix(EVENT_MARKER)?;
        if payload == DONE_SENTINEL {
            return None;
        }
        let event = match serde_json::from_str::<WireEvent>(payload) {
            Ok(event) => event,
            Err(error) => {
                trace!(%error, "dropping undecodable stream line");
                return None;
            }
        };
        Some(match event {
            WireEvent::Start => StreamEvent::Started,
            WireEvent::StartStep => StreamEvent::StepStarted,
            WireEvent::TextStart { id } => {
                self.segment.clone_from(&id);
                StreamEvent::TextStarted { id }
            }
            WireEvent::TextDelta { id, delta } => {
                self.text.push_str(&delta);
                StreamEvent::TextDelta {
                    id,
                    delta,
                    text: self.text.clone(),
                }
            }
            WireEvent::TextEnd { id } => {
                self.segment = None;
                StreamEvent::TextEnded { id }
            }
            WireEvent::FinishStep => StreamEvent::StepFinished,
            WireEvent::Finish => StreamEvent::Finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Decode a whole byte sequence in one chunk plus the close flush.
    fn decode_all(bytes: &[u8]) -> (Vec<StreamEvent>, String) {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(bytes);
        events.extend(decoder.finish());
        (events, decoder.into_text())
    }

    #[test]
    fn accumulates_deltas_with_running_totals() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in [
            "data: {\"type\":\"text-start\",\"id\":\"a\"}\n",
            "data: {\"type\":\"text-delta\",\"id\":\"a\",\"delta\":\"Hi\"}\n",
            "data: {\"type\":\"text-delta\",\"id\":\"a\",\"delta\":\" there\"}\n",
        ] {
            events.extend(decoder.feed(chunk.as_bytes()));
        }
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                StreamEvent::TextStarted {
                    id: Some("a".to_string())
                },
                StreamEvent::TextDelta {
                    id: Some("a".to_string()),
                    delta: "Hi".to_string(),
                    text: "Hi".to_string(),
                },
                StreamEvent::TextDelta {
                    id: Some("a".to_string()),
                    delta: " there".to_string(),
                    text: "Hi there".to_string(),
                },
            ]
        );
        assert_eq!(decoder.into_text(), "Hi there");
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_result() {
        let bytes = concat!(
            "data: {\"type\":\"start\"}\n",
            "data: {\"type\":\"start-step\"}\n",
            "data: {\"type\":\"text-start\",\"id\":\"s\"}\n",
            "data: {\"type\":\"text-delta\",\"id\":\"s\",\"delta\":\"héllo \"}\n",
            "data: {\"type\":\"text-delta\",\"id\":\"s\",\"delta\":\"wörld\"}\n",
            "data: {\"type\":\"text-end\",\"id\":\"s\"}\n",
            "data: {\"type\":\"finish-step\"}\n",
            "data: {\"type\":\"finish\"}\n",
            "data: [DONE]\n",
        )
        .as_bytes();

        let (reference_events, reference_text) = decode_all(bytes);
        assert_eq!(reference_text, "héllo wörld");

        // Every two-chunk split, including splits inside multi-byte
        // characters and mid-line.
        for split in 0..=bytes.len() {
            let mut decoder = StreamDecoder::new();
            let mut events = decoder.feed(&bytes[..split]);
            events.extend(decoder.feed(&bytes[split..]));
            events.extend(decoder.finish());

            assert_eq!(events, reference_events, "split at byte {split}");
            assert_eq!(decoder.into_text(), reference_text, "split at byte {split}");
        }

        // Degenerate case: one byte at a time.
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for byte in bytes {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        events.extend(decoder.finish());
        assert_eq!(events, reference_events);
        assert_eq!(decoder.into_text(), reference_text);
    }

    #[test]
    fn done_sentinel_and_unmarked_lines_are_ignored() {
        let (events, text) = decode_all(
            concat!(
                "event: noise\n",
                "data: [DONE]\n",
                "\n",
                ": comment\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"ok\"}\n",
            )
            .as_bytes(),
        );

        assert_eq!(
            events,
            vec![StreamEvent::TextDelta {
                id: None,
                delta: "ok".to_string(),
                text: "ok".to_string(),
            }]
        );
        assert_eq!(text, "ok");
    }

    #[test]
    fn malformed_and_unknown_events_degrade_to_nothing() {
        let (events, text) = decode_all(
            concat!(
                "data: {not json\n",
                "data: {\"type\":\"tool-call\",\"name\":\"x\"}\n",
                "data: {\"type\":\"text-delta\"}\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"kept\"}\n",
            )
            .as_bytes(),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(text, "kept");
    }

    #[test]
    fn crlf_line_endings_are_handled() {
        let (events, text) = decode_all(
            b"data: {\"type\":\"text-delta\",\"delta\":\"a\"}\r\ndata: {\"type\":\"text-delta\",\"delta\":\"b\"}\r\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(text, "ab");
    }

    #[test]
    fn close_flushes_an_unterminated_final_line() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"type\":\"text-delta\",\"delta\":\"partial\"}");
        assert!(events.is_empty());

        let flushed = decoder.finish();
        assert_eq!(flushed.len(), 1);
        assert_eq!(decoder.into_text(), "partial");
    }

    #[test]
    fn connection_close_finalizes_without_finish_event() {
        // Same text whether or not the service managed to send `finish`.
        let (_, with_finish) = decode_all(
            concat!(
                "data: {\"type\":\"text-delta\",\"delta\":\"cut\"}\n",
                "data: {\"type\":\"finish\"}\n",
            )
            .as_bytes(),
        );
        let (_, without_finish) =
            decode_all(b"data: {\"type\":\"text-delta\",\"delta\":\"cut\"}\n");

        assert_eq!(with_finish, "cut");
        assert_eq!(without_finish, "cut");
    }

    #[test]
    fn segment_id_tracks_open_text_segment() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.current_segment(), None);

        let _ = decoder.feed(b"data: {\"type\":\"text-start\",\"id\":\"seg7\"}\n");
        assert_eq!(decoder.current_segment(), Some("seg7"));

        let _ = decoder.feed(b"data: {\"type\":\"text-end\",\"id\":\"seg7\"}\n");
        assert_eq!(decoder.current_segment(), None);
    }

    #[test]
    fn marker_requires_exact_prefix() {
        // No space after the colon: not an event line.
        let (events, text) = decode_all(b"data:{\"type\":\"text-delta\",\"delta\":\"x\"}\n");
        assert!(events.is_empty());
        assert_eq!(text, "");
    }
}
