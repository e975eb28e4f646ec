use futures_util::StreamExt;

use crate::response::BackendStream;
use crate::types::BackendEvent;

/// Delimiters around reasoning text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    pub open: String,
    pub close: String,
}

impl TagConfig {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// `<think>...</think>`
    pub fn think() -> Self {
        Self::new("<think>", "</think>")
    }
}

impl Default for TagConfig {
    fn default() -> Self {
        Self::think()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reasoning(String),
}

/// Incremental splitter over arriving text chunks.
///
/// A chunk tail that could still grow into the expected delimiter is held
/// back until the next chunk decides it. Delimiters themselves are dropped;
/// every other byte comes out exactly once, in order. A block with nothing
/// between two delimiters still yields an empty segment so the delimiter
/// positions can be recovered.
#[derive(Debug, Clone)]
pub struct TagSplitter {
    tag: TagConfig,
    inside: bool,
    pending: String,
    crossed: bool,
    emitted: bool,
}

impl TagSplitter {
    pub fn new(tag: TagConfig) -> Self {
        Self {
            tag,
            inside: false,
            pending: String::new(),
            crossed: false,
            emitted: false,
        }
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(chunk);

        let mut out = Vec::new();
        let mut rest = buf.as_str();
        loop {
            let delim = if self.inside {
                self.tag.close.clone()
            } else {
                self.tag.open.clone()
            };
            let delim = delim.as_str();

            if let Some(idx) = rest.find(delim) {
                self.emit(&rest[..idx], &mut out);
                if self.crossed && !self.emitted {
                    out.push(self.segment(String::new()));
                }
                self.crossed = true;
                self.emitted = false;
                rest = &rest[idx + delim.len()..];
                self.inside = !self.inside;
                continue;
            }

            let keep = partial_suffix(rest, delim);
            self.emit(&rest[..rest.len() - keep], &mut out);
            self.pending = rest[rest.len() - keep..].to_string();
            break;
        }
        out
    }

    /// Release whatever is held back. Called at the end of a round.
    pub fn finish(&mut self) -> Vec<Segment> {
        let pending = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        self.emit(&pending, &mut out);
        out
    }

    fn emit(&mut self, text: &str, out: &mut Vec<Segment>) {
        if text.is_empty() {
            return;
        }
        self.emitted = true;
        out.push(self.segment(text.to_string()));
    }

    fn segment(&self, text: String) -> Segment {
        if self.inside {
            Segment::Reasoning(text)
        } else {
            Segment::Text(text)
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `delim`.
fn partial_suffix(text: &str, delim: &str) -> usize {
    let max = delim.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start) && delim.starts_with(&text[start..])
        })
        .unwrap_or(0)
}

fn to_event(segment: Segment) -> BackendEvent {
    match segment {
        Segment::Text(text) => BackendEvent::TextDelta { text },
        Segment::Reasoning(text) => BackendEvent::ReasoningDelta { text },
    }
}

/// Route delimited reasoning in text deltas to reasoning deltas.
///
/// Buffered responses are split in one go and stay buffered, with the
/// extracted reasoning appended to any reasoning they already carried.
pub fn extract_reasoning(stream: BackendStream, tag: TagConfig) -> BackendStream {
    Box::pin(async_stream::stream! {
        let mut splitter = TagSplitter::new(tag.clone());
        let mut stream = stream;

        while let Some(item) = stream.next().await {
            match item {
                Ok(BackendEvent::TextDelta { text }) => {
                    for segment in splitter.push(&text) {
                        yield Ok(to_event(segment));
                    }
                }
                Ok(BackendEvent::Buffered { text, reasoning }) => {
                    let mut whole = TagSplitter::new(tag.clone());
                    let mut segments = whole.push(&text);
                    segments.extend(whole.finish());

                    let mut visible = String::new();
                    let mut extracted = reasoning.unwrap_or_default();
                    for segment in segments {
                        match segment {
                            Segment::Text(t) => visible.push_str(&t),
                            Segment::Reasoning(r) => extracted.push_str(&r),
                        }
                    }
                    yield Ok(BackendEvent::Buffered {
                        text: visible,
                        reasoning: (!extracted.is_empty()).then_some(extracted),
                    });
                }
                Ok(done @ BackendEvent::Done { .. }) => {
                    for segment in splitter.finish() {
                        yield Ok(to_event(segment));
                    }
                    yield Ok(done);
                }
                other => yield other,
            }
        }

        for segment in splitter.finish() {
            yield Ok(to_event(segment));
        }
    })
}
