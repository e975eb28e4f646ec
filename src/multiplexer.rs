//! Ordered, bounded event channel between a generation and its consumer.
//!
//! Producers reserve channel capacity first and only then take the next
//! sequence number and enqueue, both under one lock. Channel order and
//! sequence order therefore agree no matter how many producers there are.
//! A full channel stalls producers at `reserve`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

use crate::types::{EventPayload, StreamEvent};

/// Default channel capacity per request.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Sequencer {
    next: u64,
    terminal: bool,
}

/// Producer half. Cheap to clone; all clones share one sequence.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    seq: Arc<Mutex<Sequencer>>,
    cancel: CancellationToken,
}

/// Consumer half: a finite, pull-based stream of events.
///
/// Ends after the terminal event, when every sink is gone, or as soon as
/// the request is cancelled. Dropping it cancels the request.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    done: bool,
    _guard: DropGuard,
}

pub fn channel(capacity: usize, cancel: CancellationToken) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = EventSink {
        tx,
        seq: Arc::new(Mutex::new(Sequencer::default())),
        cancel: cancel.clone(),
    };
    let stream = EventStream {
        rx,
        cancelled: Box::pin(cancel.clone().cancelled_owned()),
        done: false,
        _guard: cancel.drop_guard(),
    };
    (sink, stream)
}

impl EventSink {
    /// Enqueue `payload`. Returns the assigned sequence number, or `None`
    /// if the event was dropped: the request was aborted, a terminal event
    /// was already sent, or the consumer is gone.
    pub async fn emit(&self, payload: EventPayload) -> Option<u64> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            permit = self.tx.reserve() => permit.ok()?,
        };

        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        if seq.terminal || self.cancel.is_cancelled() {
            tracing::trace!(kind = payload.kind(), "dropping event after stream end");
            return None;
        }
        let assigned = seq.next;
        seq.next += 1;
        seq.terminal = payload.is_terminal();
        permit.send(StreamEvent {
            seq: assigned,
            payload,
        });
        Some(assigned)
    }

    pub fn terminal_sent(&self) -> bool {
        self.seq.lock().unwrap_or_else(|e| e.into_inner()).terminal
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation token shared with the consumer.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.cancelled.poll_unpin(cx).is_ready() {
            self.done = true;
            self.rx.close();
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.payload.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
