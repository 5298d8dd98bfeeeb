//! Per-turn event log with live fan-out to every subscriber.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{ErrorKind, ProtocolEvent};

/// History size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

struct StoredEvent {
    event: ProtocolEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
    /// Events evicted from the front of the history.
    evicted: usize,
    finished: bool,
    subscribers: Vec<mpsc::UnboundedSender<ProtocolEvent>>,
}

/// Event store with per-subscriber delivery and history support.
///
/// A request that attaches to a turn already in flight receives the
/// history first and then continues with live events, so every
/// subscriber observes the same ordered sequence. Each subscriber has
/// its own unbounded queue; a slow reader delays only itself and never
/// loses events.
pub struct EventStore {
    inner: Mutex<Inner>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                evicted: 0,
                finished: false,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. Ignored once the store is finished.
    pub fn push(&self, event: ProtocolEvent) {
        let mut inner = self.lock();
        if inner.finished {
            tracing::debug!(?event, "Dropping event pushed after finish");
            return;
        }

        // Dropped streams close their receiver; forget them here.
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());

        let bytes = event.approx_bytes();
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
                inner.evicted += 1;
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Mark the sequence complete; subscriber streams end here.
    pub fn finish(&self) {
        let mut inner = self.lock();
        if !inner.finished {
            inner.finished = true;
            inner.subscribers.clear();
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<ProtocolEvent> {
        self.lock().history.iter().map(|s| s.event.clone()).collect()
    }

    /// Stream that yields history first, then live events, until finished.
    ///
    /// When the front of the history has been evicted, the stream opens
    /// with an `Unclassified` error naming how many events are gone.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, ProtocolEvent> {
        // Snapshot and register under one lock so no event is lost or repeated.
        let mut inner = self.lock();
        let mut history: Vec<ProtocolEvent> = Vec::with_capacity(inner.history.len() + 1);
        if inner.evicted > 0 {
            tracing::warn!(evicted = inner.evicted, "Late subscriber missed evicted history");
            history.push(ProtocolEvent::error(
                ErrorKind::Unclassified,
                format!("{} earlier events are no longer available", inner.evicted),
            ));
        }
        history.extend(inner.history.iter().map(|s| s.event.clone()));
        let hist = futures::stream::iter(history);

        if inner.finished {
            return hist.boxed();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(tx);
        drop(inner);

        hist.chain(UnboundedReceiverStream::new(rx)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_history_then_live() {
        let store = Arc::new(EventStore::new());
        store.push(ProtocolEvent::debug("starting"));
        store.push(ProtocolEvent::content("a"));

        let stream = store.subscribe();

        store.push(ProtocolEvent::content("b"));
        store.push(ProtocolEvent::Completion { total_chars: 2 });
        store.finish();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                ProtocolEvent::debug("starting"),
                ProtocolEvent::content("a"),
                ProtocolEvent::content("b"),
                ProtocolEvent::Completion { total_chars: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribe_after_finish_replays_history() {
        let store = EventStore::new();
        store.push(ProtocolEvent::error(ErrorKind::LaunchFailed, "boom"));
        store.finish();

        let events: Vec<_> = store.subscribe().collect().await;
        assert_eq!(events.len(), 1);
        assert!(store.is_finished());
    }

    #[tokio::test]
    async fn test_push_after_finish_is_ignored() {
        let store = EventStore::new();
        store.finish();
        store.push(ProtocolEvent::content("late"));
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_see_same_sequence() {
        let store = Arc::new(EventStore::new());
        let first = store.subscribe();
        store.push(ProtocolEvent::content("x"));
        let second = store.subscribe();
        store.push(ProtocolEvent::content("y"));
        store.finish();

        let a: Vec<_> = first.collect().await;
        let b: Vec<_> = second.collect().await;
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_receives_every_event() {
        let store = EventStore::new();
        let stream = store.subscribe();

        for i in 0..20_000 {
            store.push(ProtocolEvent::content(i.to_string()));
        }
        store.push(ProtocolEvent::Completion { total_chars: 0 });
        store.finish();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 20_001);
        assert_eq!(events[0], ProtocolEvent::content("0"));
        assert_eq!(events[19_999], ProtocolEvent::content("19999"));
        assert!(events[20_000].is_completion());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ProtocolEvent::Error { .. }))
        );
    }

    #[test]
    fn test_live_stream_waits_for_events() {
        let store = EventStore::new();
        let mut stream = tokio_test::task::spawn(store.subscribe());
        tokio_test::assert_pending!(stream.poll_next());

        store.push(ProtocolEvent::content("a"));
        assert!(stream.is_woken());
        tokio_test::assert_ready_eq!(stream.poll_next(), Some(ProtocolEvent::content("a")));

        store.finish();
        tokio_test::assert_ready_eq!(stream.poll_next(), None);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() {
        let store = EventStore::new();
        drop(store.subscribe());
        store.push(ProtocolEvent::content("x"));
        assert!(store.lock().subscribers.is_empty());
    }

    #[tokio::test]
    async fn test_evicted_history_is_reported() {
        let store = EventStore::new();
        let big = "x".repeat(HISTORY_BYTES / 2 + 1);
        store.push(ProtocolEvent::content(big.clone()));
        store.push(ProtocolEvent::content(big));
        store.push(ProtocolEvent::Completion { total_chars: 0 });
        store.finish();

        let events: Vec<_> = store.subscribe().collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            ProtocolEvent::error(
                ErrorKind::Unclassified,
                "1 earlier events are no longer available"
            )
        );
        assert!(events[2].is_completion());
    }
}
