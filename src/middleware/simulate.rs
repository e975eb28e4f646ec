use std::time::Duration;

use futures_util::StreamExt;

use crate::response::BackendStream;
use crate::types::BackendEvent;

/// How a complete response is cut into deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Fixed number of characters per chunk (at least one).
    FixedSize(usize),
    /// One chunk per sentence, trailing whitespace included.
    Sentences,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        ChunkPolicy::FixedSize(5)
    }
}

/// Cut `text` into chunks. Concatenating the chunks gives back `text`.
pub fn chunk_text(text: &str, policy: ChunkPolicy) -> Vec<String> {
    match policy {
        ChunkPolicy::FixedSize(size) => {
            let size = size.max(1);
            let chars: Vec<char> = text.chars().collect();
            chars.chunks(size).map(|c| c.iter().collect()).collect()
        }
        ChunkPolicy::Sentences => {
            let mut chunks = Vec::new();
            let mut start = 0;
            let mut iter = text.char_indices().peekable();
            while let Some((idx, ch)) = iter.next() {
                if !matches!(ch, '.' | '!' | '?' | '\n') {
                    continue;
                }
                let mut end = idx + ch.len_utf8();
                if ch != '\n' && !iter.peek().map_or(true, |(_, next)| next.is_whitespace()) {
                    continue;
                }
                while let Some(&(ws_idx, ws)) = iter.peek() {
                    if !ws.is_whitespace() {
                        break;
                    }
                    end = ws_idx + ws.len_utf8();
                    iter.next();
                }
                chunks.push(text[start..end].to_string());
                start = end;
            }
            if start < text.len() {
                chunks.push(text[start..].to_string());
            }
            chunks
        }
    }
}

/// Replace each buffered response with reasoning deltas followed by text
/// deltas. Other events pass through unchanged.
pub fn simulate_streaming(
    stream: BackendStream,
    policy: ChunkPolicy,
    delay: Option<Duration>,
) -> BackendStream {
    Box::pin(async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let (text, reasoning) = match item {
                Ok(BackendEvent::Buffered { text, reasoning }) => (text, reasoning),
                other => {
                    yield other;
                    continue;
                }
            };

            let reasoning_chunks = reasoning
                .map(|r| chunk_text(&r, policy))
                .unwrap_or_default();
            let mut first = true;
            for chunk in reasoning_chunks {
                if let (Some(delay), false) = (delay, first) {
                    tokio::time::sleep(delay).await;
                }
                first = false;
                yield Ok(BackendEvent::ReasoningDelta { text: chunk });
            }
            for chunk in chunk_text(&text, policy) {
                if let (Some(delay), false) = (delay, first) {
                    tokio::time::sleep(delay).await;
                }
                first = false;
                yield Ok(BackendEvent::TextDelta { text: chunk });
            }
        }
    })
}
