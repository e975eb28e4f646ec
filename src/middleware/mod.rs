//! Transforms applied to a backend's raw event stream before the
//! controller sees it.

mod reasoning;
mod simulate;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::response::BackendStream;

pub use reasoning::{extract_reasoning, Segment, TagConfig, TagSplitter};
pub use simulate::{chunk_text, simulate_streaming, ChunkPolicy};

pub type StreamTransform = Arc<dyn Fn(BackendStream) -> BackendStream + Send + Sync>;

/// One stage of a binding's middleware pipeline.
#[derive(Clone)]
pub enum Middleware {
    /// Split delimited reasoning out of text deltas.
    ReasoningExtractor(TagConfig),
    /// Turn a buffered response into a sequence of text deltas.
    SimulatedStreamer {
        policy: ChunkPolicy,
        delay: Option<Duration>,
    },
    Custom {
        name: String,
        transform: StreamTransform,
    },
}

impl Middleware {
    pub fn reasoning(tag: TagConfig) -> Self {
        Middleware::ReasoningExtractor(tag)
    }

    pub fn simulated(policy: ChunkPolicy) -> Self {
        Middleware::SimulatedStreamer {
            policy,
            delay: None,
        }
    }

    pub fn custom<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(BackendStream) -> BackendStream + Send + Sync + 'static,
    {
        Middleware::Custom {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Middleware::ReasoningExtractor(_) => "reasoning-extractor",
            Middleware::SimulatedStreamer { .. } => "simulated-streamer",
            Middleware::Custom { name, .. } => name,
        }
    }

    pub fn apply(&self, stream: BackendStream) -> BackendStream {
        match self {
            Middleware::ReasoningExtractor(tag) => extract_reasoning(stream, tag.clone()),
            Middleware::SimulatedStreamer { policy, delay } => {
                simulate_streaming(stream, *policy, *delay)
            }
            Middleware::Custom { transform, .. } => transform(stream),
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::ReasoningExtractor(tag) => {
                f.debug_tuple("ReasoningExtractor").field(tag).finish()
            }
            Middleware::SimulatedStreamer { policy, delay } => f
                .debug_struct("SimulatedStreamer")
                .field("policy", policy)
                .field("delay", delay)
                .finish(),
            Middleware::Custom { name, .. } => {
                f.debug_struct("Custom").field("name", name).finish()
            }
        }
    }
}

/// Apply `pipeline` left to right: the first entry sees the raw stream.
pub fn apply_all(pipeline: &[Middleware], stream: BackendStream) -> BackendStream {
    pipeline.iter().fold(stream, |stream, middleware| middleware.apply(stream))
}
