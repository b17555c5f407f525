//! Incremental decoder for the chat-completions event stream.
//!
//! Wire format: one JSON delta envelope per `data: ` line, terminated by a
//! literal `data: [DONE]` sentinel. Chunk boundaries carry no meaning, so
//! the decoder buffers the unterminated tail of each chunk and only ever
//! parses complete lines.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// A single decoded delta from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    /// Chain-of-thought text (`delta.reasoning_content`).
    Reasoning(String),
    /// Answer text (`delta.content`).
    Content(String),
    /// Stream terminator; nothing is emitted after it.
    Done,
}

#[derive(Debug, Deserialize)]
struct DeltaEnvelope {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: DeltaBody,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Incremental stream decoder that buffers incomplete lines across chunk
/// boundaries.
///
/// The carry-over buffer holds raw bytes, not text: a chunk boundary may
/// fall inside a multibyte UTF-8 sequence, so conversion happens per
/// complete line only.
pub struct StreamDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Feed raw bytes from the HTTP response. Returns any complete delta
    /// events found. A line split across chunks is held until its
    /// terminator arrives; it is never parsed partially.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim_end_matches(['\n', '\r']), &mut events);
            if self.finished {
                break;
            }
        }

        events
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<DeltaEvent>) {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };

        if payload == DONE_SENTINEL {
            self.finished = true;
            out.push(DeltaEvent::Done);
            return;
        }

        // Corrupt or partial JSON is skipped; a bad line must never abort
        // the stream.
        let Ok(envelope) = serde_json::from_str::<DeltaEnvelope>(payload) else {
            return;
        };
        let Some(choice) = envelope.choices.into_iter().next() else {
            return;
        };

        // A single line may interleave reasoning and answer tokens.
        if let Some(text) = choice.delta.reasoning_content {
            if !text.is_empty() {
                out.push(DeltaEvent::Reasoning(text));
            }
        }
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                out.push(DeltaEvent::Content(text));
            }
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(reasoning: Option<&str>, content: Option<&str>) -> String {
        let mut delta = serde_json::Map::new();
        if let Some(r) = reasoning {
            delta.insert("reasoning_content".into(), r.into());
        }
        if let Some(c) = content {
            delta.insert("content".into(), c.into());
        }
        format!(
            "data: {}\n",
            serde_json::json!({ "choices": [{ "delta": delta }] })
        )
    }

    #[test]
    fn test_basic_content_delta() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(delta_line(None, Some("Hi")).as_bytes());
        assert_eq!(events, vec![DeltaEvent::Content("Hi".into())]);
    }

    #[test]
    fn test_reasoning_and_content_in_one_line() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(delta_line(Some("thinking"), Some("answer")).as_bytes());
        assert_eq!(
            events,
            vec![
                DeltaEvent::Reasoning("thinking".into()),
                DeltaEvent::Content("answer".into()),
            ]
        );
    }

    #[test]
    fn test_done_sentinel_ends_stream() {
        let mut decoder = StreamDecoder::new();
        let mut input = delta_line(None, Some("Hi"));
        input.push_str("data: [DONE]\n");
        input.push_str(&delta_line(None, Some("late")));
        let events = decoder.feed(input.as_bytes());
        assert_eq!(
            events,
            vec![DeltaEvent::Content("Hi".into()), DeltaEvent::Done]
        );
        // Further feeds after the sentinel emit nothing.
        assert!(decoder.feed(delta_line(None, Some("more")).as_bytes()).is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut decoder = StreamDecoder::new();
        let mut input = String::from("data: {not json}\n");
        input.push_str(&delta_line(None, Some("ok")));
        let events = decoder.feed(input.as_bytes());
        assert_eq!(events, vec![DeltaEvent::Content("ok".into())]);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b": keep-alive\n\nevent: ping\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_partial_line_never_parsed() {
        let mut decoder = StreamDecoder::new();
        let line = delta_line(None, Some("split"));
        let (head, tail) = line.split_at(line.len() / 2);
        assert!(decoder.feed(head.as_bytes()).is_empty());
        assert_eq!(
            decoder.feed(tail.as_bytes()),
            vec![DeltaEvent::Content("split".into())]
        );
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let line = delta_line(None, Some("你好"));
        let bytes = line.as_bytes();
        // Split inside the three-byte sequence of the first character.
        let split = line.find('你').unwrap() + 1;
        assert!(decoder.feed(&bytes[..split]).is_empty());
        assert_eq!(
            decoder.feed(&bytes[split..]),
            vec![DeltaEvent::Content("你好".into())]
        );
    }

    #[test]
    fn test_crlf_terminators() {
        let mut decoder = StreamDecoder::new();
        let events =
            decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\ndata: [DONE]\r\n");
        assert_eq!(
            events,
            vec![DeltaEvent::Content("Hi".into()), DeltaEvent::Done]
        );
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let mut stream = String::new();
        stream.push_str(&delta_line(Some("hmm"), None));
        stream.push_str("data: {corrupt\n");
        stream.push_str(&delta_line(None, Some("Hello")));
        stream.push_str(&delta_line(Some("思考中"), Some("，世界！")));
        stream.push_str(&delta_line(None, Some(" world")));
        stream.push_str("data: [DONE]\n");
        let bytes = stream.as_bytes();

        let mut reference = StreamDecoder::new();
        let expected = reference.feed(bytes);
        assert_eq!(expected.last(), Some(&DeltaEvent::Done));

        // Every two-way split of the byte sequence decodes identically.
        for split in 0..=bytes.len() {
            let mut decoder = StreamDecoder::new();
            let mut events = decoder.feed(&bytes[..split]);
            events.extend(decoder.feed(&bytes[split..]));
            assert_eq!(events, expected, "split at byte {split}");
        }
    }
}
