//! Incremental decoder for `data: <payload>` event streams.
//!
//! [`StreamDecoder`] is the synchronous core: bytes in, [`StreamEvent`]s out.
//! [`decode_stream`] drives it from an async byte stream and forwards events
//! into a channel until the stream ends, fails, or is cancelled.

use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::scalar_to_string;
use crate::error::ChatError;
use crate::markdown;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Metadata the server attaches to a stream through a JSON payload carrying
/// an `interaction_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    pub interaction_id: Option<String>,
    /// Seconds, as reported by the server.
    pub response_time: Option<f64>,
    pub tokens_used: Option<u64>,
    pub language: Option<String>,
}

/// One decoded unit of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Visible text. `html` is the rendering of everything accumulated so far.
    Chunk { delta: String, html: String },
    /// Metadata payload; no visible output.
    Metadata(StreamMetadata),
    /// The `[DONE]` sentinel.
    Done,
}

/// Result of a stream decoded to its end.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub text: String,
    pub html: String,
    pub metadata: StreamMetadata,
    /// Whether `[DONE]` was seen before the byte stream ended.
    pub completed: bool,
    pub elapsed: Duration,
}

impl StreamOutcome {
    /// Server-reported response time, or the client-side measurement.
    pub fn response_time_secs(&self) -> f64 {
        self.metadata
            .response_time
            .unwrap_or_else(|| self.elapsed.as_secs_f64())
    }
}

/// Per-call decoder state.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending_bytes: Vec<u8>,
    /// Decoded text after the last newline.
    carry: String,
    emitted_any: bool,
    accumulated: String,
    metadata: StreamMetadata,
    done: bool,
}

impl StreamDecoder {
    /// Create a new decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read from the byte stream.
    ///
    /// Complete lines are processed immediately; a trailing partial line is
    /// held until a later feed or [`finish`](Self::finish).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, ChatError> {
        self.decode_utf8(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.carry.find('\n') {
            let mut line: String = self.carry.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.process_line(&line, &mut events)?;
        }
        Ok(events)
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>, ChatError> {
        if !self.pending_bytes.is_empty() {
            warn!(
                bytes = self.pending_bytes.len(),
                "Stream ended inside a UTF-8 sequence"
            );
            let tail = std::mem::take(&mut self.pending_bytes);
            self.carry.push_str(&String::from_utf8_lossy(&tail));
        }

        let mut events = Vec::new();
        let line = std::mem::take(&mut self.carry);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if !line.is_empty() {
            self.process_line(line, &mut events)?;
        }
        Ok(events)
    }

    /// Text assembled from every chunk so far.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume the decoder into its final outcome.
    pub fn into_outcome(self, elapsed: Duration) -> StreamOutcome {
        let html = markdown::render(Some(self.accumulated.as_str()));
        StreamOutcome {
            text: self.accumulated,
            html,
            metadata: self.metadata,
            completed: self.done,
            elapsed,
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        let mut input = std::mem::take(&mut self.pending_bytes);
        input.extend_from_slice(bytes);

        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.carry.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.carry
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(invalid) => {
                            self.carry.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            self.pending_bytes = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> Result<(), ChatError> {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Ok(());
        };
        if self.done {
            trace!("Ignoring data line after end of stream");
            return Ok(());
        }

        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            self.done = true;
            events.push(StreamEvent::Done);
            return Ok(());
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(object)) => self.process_object(object, events),
            _ => {
                // Stray braces from servers that pretty-print their JSON
                if payload != "{" && payload != "}" {
                    self.push_chunk(payload, events);
                }
                Ok(())
            }
        }
    }

    fn process_object(
        &mut self,
        object: Map<String, Value>,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ChatError> {
        if let Some(message) = object.get("error").and_then(Value::as_str) {
            return Err(ChatError::Upstream {
                status: None,
                message: message.to_string(),
            });
        }

        if let Some(id) = object.get("interaction_id") {
            self.metadata = StreamMetadata {
                interaction_id: scalar_to_string(id),
                response_time: object.get("response_time").and_then(Value::as_f64),
                tokens_used: object.get("tokens_used").and_then(Value::as_u64),
                language: object
                    .get("language")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            debug!(interaction_id = ?self.metadata.interaction_id, "Stream metadata received");
            events.push(StreamEvent::Metadata(self.metadata.clone()));
            return Ok(());
        }

        match object.get("content").and_then(Value::as_str) {
            Some(content) => self.push_chunk(content, events),
            None => trace!("Ignoring object payload without content"),
        }
        Ok(())
    }

    fn push_chunk(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let chunk = if self.emitted_any {
            text.strip_prefix(' ').unwrap_or(text)
        } else {
            text
        };
        if chunk.is_empty() {
            return;
        }

        self.emitted_any = true;
        self.accumulated.push_str(chunk);
        events.push(StreamEvent::Chunk {
            delta: chunk.to_string(),
            html: markdown::render(Some(self.accumulated.as_str())),
        });
    }
}

/// Pull `stream` to its end, forwarding decoded events into `events`.
///
/// Returns [`ChatError::Cancelled`] as soon as `cancel` fires. A dropped
/// receiver does not stop decoding.
pub async fn decode_stream<S, B, E>(
    stream: S,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, ChatError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut stream = std::pin::pin!(stream);
    let mut decoder = StreamDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream decoding cancelled");
                return Err(ChatError::Cancelled);
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => forward(decoder.feed(bytes.as_ref())?, &events),
            Some(Err(e)) => return Err(ChatError::Transport(e.to_string())),
            None => break,
        }
    }

    forward(decoder.finish()?, &events);
    if !decoder.is_done() {
        debug!("Byte stream ended without a [DONE] sentinel");
    }
    Ok(decoder.into_outcome(started.elapsed()))
}

fn forward(batch: Vec<StreamEvent>, events: &mpsc::UnboundedSender<StreamEvent>) {
    for event in batch {
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect()
    }

    fn decode_all<R: AsRef<[u8]>>(reads: &[R]) -> (StreamDecoder, Vec<StreamEvent>) {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for read in reads {
            events.extend(decoder.feed(read.as_ref()).unwrap());
        }
        events.extend(decoder.finish().unwrap());
        (decoder, events)
    }

    // ---- Framing ----

    #[test]
    fn test_basic_frames() {
        let (decoder, events) = decode_all(&[b"data: Hel\ndata: lo\ndata: [DONE]\n"]);
        assert_eq!(chunks(&events), vec!["Hel", "lo"]);
        assert_eq!(decoder.accumulated(), "Hello");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let whole = b"data: Hel\ndata: lo\ndata: [DONE]\n";
        let (expected, _) = decode_all(&[whole]);

        for split in 1..whole.len() {
            let (a, b) = whole.split_at(split);
            let (decoder, _) = decode_all(&[a, b]);
            assert_eq!(decoder.accumulated(), expected.accumulated(), "split at {}", split);
            assert!(decoder.is_done(), "split at {}", split);
        }

        let bytewise: Vec<&[u8]> = whole.chunks(1).collect();
        let (decoder, _) = decode_all(&bytewise);
        assert_eq!(decoder.accumulated(), "Hello");
    }

    #[test]
    fn test_crlf_lines() {
        let (decoder, _) = decode_all(&[b"data: Hi\r\ndata: [DONE]\r\n"]);
        assert_eq!(decoder.accumulated(), "Hi");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let (decoder, events) = decode_all(&[b": keepalive\nevent: message\n\ndata: ok\n"]);
        assert_eq!(chunks(&events), vec!["ok"]);
        assert_eq!(decoder.accumulated(), "ok");
    }

    #[test]
    fn test_trailing_line_without_newline_processed_at_end() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: partial").unwrap();
        assert!(events.is_empty());
        let events = decoder.finish().unwrap();
        assert_eq!(chunks(&events), vec!["partial"]);
    }

    #[test]
    fn test_data_after_done_ignored() {
        let (decoder, events) = decode_all(&[b"data: a\ndata: [DONE]\ndata: b\n"]);
        assert_eq!(chunks(&events), vec!["a"]);
        assert_eq!(decoder.accumulated(), "a");
    }

    // ---- Payload classification ----

    #[test]
    fn test_json_content_payload() {
        let (decoder, _) = decode_all(&[
            b"data: {\"content\": \"Hi\"}\ndata: {\"content\": \" there\"}\n",
        ]);
        assert_eq!(decoder.accumulated(), "Hithere");
    }

    #[test]
    fn test_first_chunk_keeps_leading_space_later_ones_lose_one() {
        let (decoder, events) = decode_all(&[
            b"data: {\"content\": \" Hi\"}\ndata: {\"content\": \" there\"}\ndata: {\"content\": \"  two\"}\n",
        ]);
        assert_eq!(chunks(&events), vec![" Hi", "there", " two"]);
        assert_eq!(decoder.accumulated(), " Hithere two");
    }

    #[test]
    fn test_empty_first_chunk_does_not_count_as_first() {
        let (_, events) = decode_all(&[
            b"data: {\"content\": \"\"}\ndata: {\"content\": \" Hi\"}\n",
        ]);
        assert_eq!(chunks(&events), vec![" Hi"]);
    }

    #[test]
    fn test_metadata_payload_captured_without_output() {
        let (decoder, events) = decode_all(&[
            b"data: Hi\ndata: {\"interaction_id\": \"abc\", \"response_time\": 1.5, \"tokens_used\": 42, \"language\": \"en\"}\n",
        ]);
        assert_eq!(chunks(&events), vec!["Hi"]);
        let meta = decoder.metadata();
        assert_eq!(meta.interaction_id.as_deref(), Some("abc"));
        assert_eq!(meta.response_time, Some(1.5));
        assert_eq!(meta.tokens_used, Some(42));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Metadata(_))));
    }

    #[test]
    fn test_numeric_interaction_id() {
        let (decoder, _) = decode_all(&[b"data: {\"interaction_id\": 17}\n"]);
        assert_eq!(decoder.metadata().interaction_id.as_deref(), Some("17"));
    }

    #[test]
    fn test_stray_braces_dropped() {
        let (decoder, events) = decode_all(&[b"data: {\ndata: text\ndata: }\n"]);
        assert_eq!(chunks(&events), vec!["text"]);
        assert_eq!(decoder.accumulated(), "text");
    }

    #[test]
    fn test_non_object_json_is_raw_text() {
        let (decoder, _) = decode_all(&[b"data: 42\n"]);
        assert_eq!(decoder.accumulated(), "42");
    }

    #[test]
    fn test_error_payload_aborts() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"data: partial\n").unwrap();
        let err = decoder
            .feed(b"data: {\"error\": \"model overloaded\"}\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::Upstream { status: None, ref message } if message == "model overloaded"
        ));
        assert_eq!(decoder.accumulated(), "partial");
    }

    #[test]
    fn test_object_without_known_fields_ignored() {
        let (decoder, events) = decode_all(&[b"data: {\"ping\": true}\n"]);
        assert!(events.is_empty());
        assert_eq!(decoder.accumulated(), "");
    }

    // ---- UTF-8 ----

    #[test]
    fn test_multibyte_split_across_reads() {
        let text = "data: Café ☕\n".as_bytes();
        // Split inside the three-byte cup
        let cut = text.len() - 2;
        let (decoder, _) = decode_all(&[&text[..cut], &text[cut..]]);
        assert_eq!(decoder.accumulated(), "Café ☕");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let (decoder, _) = decode_all(&[b"data: a\xffb\n"]);
        assert_eq!(decoder.accumulated(), "a\u{fffd}b");
    }

    // ---- Rendering ----

    #[test]
    fn test_chunk_html_is_cumulative_rendering() {
        let (_, events) = decode_all(&[b"data: **bo\ndata: ld**\n"]);
        match events.last() {
            Some(StreamEvent::Chunk { html, .. }) => assert_eq!(html, "<b>bold</b>"),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    // ---- Async driver ----

    fn byte_stream(
        reads: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> {
        futures_util::stream::iter(reads.into_iter().map(|r| Ok(r.to_vec())))
    }

    #[tokio::test]
    async fn test_decode_stream_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let outcome = decode_stream(
            byte_stream(vec![&b"data: Hel"[..], &b"\ndata: lo\n"[..], &b"data: [DONE]\n"[..]]),
            tx,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.html, "Hello");
        assert!(outcome.completed);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(chunks(&received), vec!["Hel", "lo"]);
        assert_eq!(received.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_decode_stream_without_done() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let outcome = decode_stream(byte_stream(vec![&b"data: x"[..]]), tx, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.text, "x");
        assert!(!outcome.completed);
    }

    #[tokio::test]
    async fn test_decode_stream_transport_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stream = futures_util::stream::iter(vec![
            Ok(b"data: a\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = decode_stream(stream, tx, &cancel).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(ref m) if m.contains("reset")));
    }

    #[tokio::test]
    async fn test_decode_stream_cancelled() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = futures_util::stream::pending::<Result<Vec<u8>, std::io::Error>>();
        let err = decode_stream(stream, tx, &cancel).await.unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
    }

    #[test]
    fn test_response_time_prefers_server_value() {
        let mut outcome = StreamOutcome {
            text: String::new(),
            html: String::new(),
            metadata: StreamMetadata::default(),
            completed: true,
            elapsed: Duration::from_millis(2500),
        };
        assert_eq!(outcome.response_time_secs(), 2.5);
        outcome.metadata.response_time = Some(0.8);
        assert_eq!(outcome.response_time_secs(), 0.8);
    }
}
