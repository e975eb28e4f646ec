//! Server-Sent Events decoding for upstream backend responses.

use futures_util::{Stream, StreamExt};
use memchr::memmem;

use crate::Error;

/// Upper bound on bytes buffered while waiting for a frame to complete.
const MAX_PENDING_BYTES: usize = 1 << 20;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// The OpenAI-style end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental decoder: feed it raw bytes as they arrive and collect the
/// frames they complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, Error> {
        // Normalise CRLF so a single separator search covers both forms. A
        // lone '\r' left at the end of a chunk is completed by the next one.
        for &byte in chunk {
            if byte == b'\n' && self.pending.last() == Some(&b'\r') {
                self.pending.pop();
            }
            self.pending.push(byte);
        }

        let finder = memmem::Finder::new(b"\n\n");
        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = finder.find(&self.pending[consumed..]) {
            let end = consumed + pos;
            if let Some(event) = parse_frame(&self.pending[consumed..end])? {
                events.push(event);
            }
            consumed = end + 2;
        }
        self.pending.drain(..consumed);

        // Only an unterminated frame counts against the limit.
        if self.pending.len() > MAX_PENDING_BYTES {
            self.pending.clear();
            return Err(Error::streaming("SSE frame exceeded maximum size"));
        }
        Ok(events)
    }

    /// Decode whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, Error> {
        let rest = std::mem::take(&mut self.pending);
        parse_frame(&rest)
    }
}

fn parse_frame(bytes: &[u8]) -> Result<Option<SseEvent>, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::streaming(format!("invalid UTF-8 in SSE frame: {e}")))?;

    let mut event = SseEvent::default();
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "event" => event.event_type = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() {
        return Ok(None);
    }
    event.data = data.join("\n");
    Ok(Some(event))
}

/// Decode a byte stream into SSE frames.
pub fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, Error>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        futures_util::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(Error::streaming(format!("upstream stream error: {e}")));
                    return;
                }
            };
            match decoder.feed(chunk.as_ref()) {
                Ok(events) => {
                    for event in events {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        match decoder.finish() {
            Ok(Some(event)) => yield Ok(event),
            Ok(None) => {}
            Err(e) => yield Err(e),
        }
    }
}
