//! SSE framing. One discipline, two layers: bytes are buffered until a
//! newline proves a line complete, `data:`-prefixed payloads are handed
//! up, and a literal `[DONE]` sentinel is swallowed rather than parsed.
//! `EventDecoder` yields typed `StreamEvent`s for the widget session;
//! `DeltaDecoder` yields content deltas from OpenAI-style upstream chunks.

use crate::providers::OpenRouterChunk;
use crate::schema::StreamEvent;

/// Incremental `data: <payload>\n\n` frame scanner. Feed it byte chunks
/// split at arbitrary boundaries; it never acts on a partial line. The
/// buffer stays raw bytes so a cut inside a multibyte character cannot
/// corrupt the payload — decoding happens per complete line only.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        SseParser::default()
    }

    /// Push raw bytes, get back every complete data payload they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            if let Some(data) = line.strip_prefix("data: ") {
                if data != "[DONE]" {
                    payloads.push(data.to_string());
                }
            }
        }

        payloads
    }

    /// Unconsumed partial line still waiting for its newline.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

/// Decodes SSE frames into `StreamEvent`s. Payloads that fail to parse
/// as a known event are dropped, matching the tolerant consumer contract.
#[derive(Debug, Default)]
pub struct EventDecoder {
    parser: SseParser,
}

impl EventDecoder {
    pub fn new() -> Self {
        EventDecoder::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.parser
            .push(bytes)
            .iter()
            .filter_map(|payload| serde_json::from_str::<StreamEvent>(payload).ok())
            .collect()
    }
}

/// Decodes upstream completion frames into bare content deltas.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    parser: SseParser,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        DeltaDecoder::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        for payload in self.parser.push(bytes) {
            if let Ok(chunk) = serde_json::from_str::<OpenRouterChunk>(&payload) {
                if let Some(choice) = chunk.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty() {
                            deltas.push(content.clone());
                        }
                    }
                }
            }
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut p = SseParser::new();
        let out = p.push(b"data: {\"x\":1}\n\n");
        assert_eq!(out, vec!["{\"x\":1}".to_string()]);
        assert!(p.pending().is_empty());
    }

    #[test]
    fn test_partial_line_buffered_across_pushes() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: {\"x\"").is_empty());
        assert_eq!(p.pending(), "data: {\"x\"");
        let out = p.push(b":1}\n\n");
        assert_eq!(out, vec!["{\"x\":1}".to_string()]);
    }

    #[test]
    fn test_done_sentinel_swallowed() {
        let mut p = SseParser::new();
        let out = p.push(b"data: [DONE]\n\ndata: tail\n\n");
        assert_eq!(out, vec!["tail".to_string()]);
    }

    #[test]
    fn test_crlf_lines_tolerated() {
        let mut p = SseParser::new();
        let out = p.push(b"data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut p = SseParser::new();
        let out = p.push(b"event: ping\n: comment\ndata: x\n\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn test_multiple_frames_single_push() {
        let mut p = SseParser::new();
        let out = p.push(b"data: 1\n\ndata: 2\n\ndata: 3\n\n");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_event_decoder_parses_stream_events() {
        let mut d = EventDecoder::new();
        let events = d.push(
            b"data: {\"type\":\"chat_start\"}\n\ndata: {\"type\":\"chat_chunk\",\"content\":\"hi\"}\n\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::ChatStart,
                StreamEvent::ChatChunk {
                    content: "hi".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_event_decoder_drops_malformed_payloads() {
        let mut d = EventDecoder::new();
        let events = d.push(b"data: not json\n\ndata: {\"type\":\"chat_start\"}\n\n");
        assert_eq!(events, vec![StreamEvent::ChatStart]);
    }

    #[test]
    fn test_event_decoder_split_mid_multibyte_frame() {
        let frame = "data: {\"type\":\"chat_chunk\",\"content\":\"Тарифы\"}\n\n".as_bytes();
        // Every split point must decode identically, including cuts that
        // land inside a multibyte character.
        for cut in 0..frame.len() {
            let mut d = EventDecoder::new();
            let mut events = d.push(&frame[..cut]);
            events.extend(d.push(&frame[cut..]));
            assert_eq!(
                events,
                vec![StreamEvent::ChatChunk {
                    content: "Тарифы".to_string()
                }],
                "diverged at cut {}",
                cut
            );
        }
    }

    #[test]
    fn test_delta_decoder_extracts_content() {
        let mut d = DeltaDecoder::new();
        let deltas = d.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n",
        );
        assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[test]
    fn test_delta_decoder_skips_empty_and_final_chunks() {
        let mut d = DeltaDecoder::new();
        let deltas = d.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"\"},\"finish_reason\":null}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        assert!(deltas.is_empty());
    }
}
