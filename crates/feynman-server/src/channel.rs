//! Ordered multi-producer / single-consumer event channel.
//!
//! Backed by a tokio `broadcast` channel with exactly one receiver, owned by
//! the broadcast server. `send` never blocks and may be called from any
//! thread, sync or async. The buffer is bounded: when it is full the oldest
//! events are evicted and the consumer logs how many it lost. Events queued
//! while no viewer is connected wait here for the next viewer.

use feynman_core::Event;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default buffer size, in events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 65_536;

/// Create a channel holding about `capacity` undelivered events.
///
/// The buffer size is `capacity` rounded up to the next power of two, so
/// `channel(5)` keeps the newest 8.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer handle. Cheap to clone; one per emitter.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<Event>,
}

impl EventSender {
    /// Enqueue an event. Never blocks. Per-thread order is preserved.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(kind = %e.0.kind(), id = %e.0.id, "event dropped: channel has no consumer");
        }
    }

    /// Number of events not yet taken by the consumer.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer handle, held by the broadcast server.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Next event in enqueue order. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event channel full, dropped oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event channel full, dropped oldest events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Take everything currently queued.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feynman_core::{EventKind, Payload, Text};
    use std::thread;

    fn text_event(label: String) -> Event {
        Event::new(label.clone(), Text::new(label, 0, 0).into())
    }

    #[test]
    fn send_then_drain_preserves_order() {
        let (tx, mut rx) = channel(16);
        for n in 0..5 {
            tx.send(text_event(format!("e{n}")));
        }
        assert_eq!(tx.queued(), 5);
        let ids: Vec<_> = rx.drain().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(tx.queued(), 0);
    }

    #[test]
    fn full_buffer_drops_oldest() {
        let (tx, mut rx) = channel(4);
        for n in 0..10 {
            tx.send(text_event(format!("e{n}")));
        }
        let ids: Vec<_> = rx.drain().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e6", "e7", "e8", "e9"]);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (tx, mut rx) = channel(5);
        for n in 0..12 {
            tx.send(text_event(format!("e{n}")));
        }
        let ids: Vec<_> = rx.drain().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids.first().map(String::as_str), Some("e4"));
    }

    #[test]
    fn per_thread_order_is_preserved_across_producers() {
        let (tx, mut rx) = channel(1024);
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for n in 0..50 {
                        tx.send(text_event(format!("{name}-{n}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = rx.drain();
        assert_eq!(events.len(), 100);
        assert!(events.iter().all(|e| e.kind() == EventKind::Text));
        for name in ["a", "b"] {
            let seq: Vec<u32> = events
                .iter()
                .filter_map(|e| match &e.payload {
                    Payload::Text(t) => t.text.strip_prefix(&format!("{name}-"))?.parse().ok(),
                    _ => None,
                })
                .collect();
            assert_eq!(seq, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn recv_returns_none_when_senders_are_gone() {
        let (tx, mut rx) = channel(4);
        tx.send(text_event("last".into()));
        drop(tx);
        assert_eq!(rx.recv().await.map(|e| e.id), Some("last".to_owned()));
        assert!(rx.recv().await.is_none());
    }
}
