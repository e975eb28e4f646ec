//! Server-sent-event framing for client-facing events.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::types::{EventPayload, StreamEvent};

#[derive(Serialize)]
struct Frame<'a> {
    seq: u64,
    #[serde(flatten)]
    payload: &'a EventPayload,
}

/// Encode one event as `data: {"type":…,"seq":…,"data":…}\n\n`.
pub fn encode_frame(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(&Frame {
        seq: event.seq,
        payload: &event.payload,
    })?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// Frame every event of `events` for an SSE response body.
///
/// An event that fails to serialize is replaced by an `error` frame with
/// the same sequence number, and the body ends there.
pub fn sse_body<S>(events: S) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> + Send
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    async_stream::stream! {
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            match encode_frame(&event) {
                Ok(frame) => yield Ok(frame),
                Err(error) => {
                    tracing::error!(seq = event.seq, kind = event.payload.kind(), error = %error, "failed to encode event");
                    let fallback = StreamEvent {
                        seq: event.seq,
                        payload: EventPayload::error(&crate::Error::from(error)),
                    };
                    if let Ok(frame) = encode_frame(&fallback) {
                        yield Ok(frame);
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Usage};
    use serde_json::Value;

    fn decode(frame: &[u8]) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn frame_layout() {
        let frame = encode_frame(&StreamEvent {
            seq: 3,
            payload: EventPayload::TextDelta {
                text: "hi".to_string(),
            },
        })
        .unwrap();
        let value = decode(&frame);
        assert_eq!(value["type"], "text-delta");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["data"]["text"], "hi");
    }

    #[tokio::test]
    async fn body_frames_in_order() {
        let events = vec![
            StreamEvent {
                seq: 0,
                payload: EventPayload::TextDelta {
                    text: "a".to_string(),
                },
            },
            StreamEvent {
                seq: 1,
                payload: EventPayload::Finish {
                    finish_reason: FinishReason::Stop,
                    usage: Usage::new(1, 1),
                    model: "scira-default".to_string(),
                    completion_time_ms: 5,
                },
            },
        ];
        let frames: Vec<_> = sse_body(futures_util::stream::iter(events))
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        let finish = decode(&frames[1]);
        assert_eq!(finish["type"], "finish");
        assert_eq!(finish["data"]["finishReason"], "stop");
        assert_eq!(finish["data"]["usage"]["totalTokens"], 2);
    }
}
