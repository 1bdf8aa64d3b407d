//! Outbound event fan-out with sequence numbers and a bounded replay window.

use async_stream::stream;
use futures::Stream;
use parking_lot::Mutex;
use parley_core::{SessionEvent, SessionEventKind};
use std::collections::VecDeque;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

/// Stream of outbound session events.
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// Assigns monotonic sequence numbers, retains a bounded replay window, and
/// fans events out to any number of subscribers.
///
/// Closing the log ends every live subscriber stream; replay of retained
/// events keeps working so late resumers still drain the tail.
pub struct EventLog {
    inner: Mutex<LogInner>,
}

struct LogInner {
    next_seq: u64,
    buffer: VecDeque<SessionEvent>,
    capacity: usize,
    tx: Option<broadcast::Sender<SessionEvent>>,
}

impl EventLog {
    /// Create a log retaining up to `capacity` events for replay.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Mutex::new(LogInner {
                next_seq: 0,
                buffer: VecDeque::with_capacity(capacity.min(64)),
                capacity: capacity.max(1),
                tx: Some(tx),
            }),
        }
    }

    /// Append an event, assigning the next sequence number.
    pub fn emit(&self, kind: SessionEventKind) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let event = SessionEvent { seq: inner.next_seq, kind };
        if inner.buffer.len() == inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(event.clone());
        if let Some(tx) = &inner.tx {
            // No live subscribers is fine; the replay window covers them.
            let _ = tx.send(event);
        }
        inner.next_seq
    }

    /// Sequence number of the most recently emitted event.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Stop fan-out; live subscriber streams end after draining.
    pub fn close(&self) {
        self.inner.lock().tx = None;
    }

    /// A stream of every retained event with `seq > after`, followed by
    /// live events. Snapshot and subscription happen atomically, so no
    /// event is missed between them and none is delivered twice.
    pub fn stream_after(&self, after: u64) -> EventStream {
        let (replay, live_rx) = {
            let inner = self.inner.lock();
            if let Some(first) = inner.buffer.front() {
                if after + 1 < first.seq {
                    warn!(
                        resume_after = after,
                        oldest_retained = first.seq,
                        "resumption point fell out of the replay window; events were lost"
                    );
                }
            }
            let replay: Vec<SessionEvent> =
                inner.buffer.iter().filter(|e| e.seq > after).cloned().collect();
            (replay, inner.tx.as_ref().map(|tx| tx.subscribe()))
        };

        Box::pin(stream! {
            let mut last = after;
            for event in replay {
                last = event.seq;
                yield event;
            }
            let Some(rx) = live_rx else { return };
            let mut live = BroadcastStream::new(rx);
            while let Some(item) = live.next().await {
                match item {
                    Ok(event) if event.seq > last => {
                        last = event.seq;
                        yield event;
                    }
                    Ok(_) => {} // already delivered during replay
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "outbound subscriber lagged; events dropped");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::CloseReason;

    fn turn_complete(id: &str) -> SessionEventKind {
        SessionEventKind::TurnComplete { turn_id: id.to_string() }
    }

    #[tokio::test]
    async fn test_seq_monotonic() {
        let log = EventLog::new(8);
        assert_eq!(log.emit(turn_complete("a")), 1);
        assert_eq!(log.emit(turn_complete("b")), 2);
        assert_eq!(log.last_seq(), 2);
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let log = EventLog::new(8);
        log.emit(turn_complete("a"));
        log.emit(turn_complete("b"));

        let mut stream = log.stream_after(1);
        log.emit(turn_complete("c"));
        log.close();

        let mut seqs = Vec::new();
        while let Some(event) = stream.next().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_no_duplicates_across_replay_boundary() {
        let log = EventLog::new(8);
        log.emit(turn_complete("a"));

        // Subscribe, then emit: the event must arrive exactly once.
        let mut stream = log.stream_after(0);
        log.emit(SessionEventKind::SessionClosed { reason: CloseReason::ClientRequested });
        log.close();

        let mut seqs = Vec::new();
        while let Some(event) = stream.next().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_window_eviction() {
        let log = EventLog::new(2);
        for turn in ["a", "b", "c", "d"] {
            log.emit(turn_complete(turn));
        }
        log.close();

        let seqs: Vec<u64> = log.stream_after(0).map(|e| e.seq).collect().await;
        assert_eq!(seqs, vec![3, 4]);
    }
}
