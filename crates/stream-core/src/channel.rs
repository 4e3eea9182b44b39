//! The subscriber delivery channel: single producer (the manager's broadcast
//! path), single consumer (the session forwarder or SSE loop), bounded at
//! capacity `C`, with drop-oldest-on-full semantics the producer can apply
//! without needing to block on — or race — the consumer (spec §4.1 step 5,
//! §5 "Shared-resource policy").
//!
//! A plain `tokio::sync::mpsc` channel doesn't let the producer pop an
//! already-queued item, so delivery uses a small mutex-guarded deque instead.
//! The mutex is held only for the instant of a push/pop, never across an
//! await, so it adds no suspension point the manager lock doesn't already
//! forbid.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use stream_protocol::BufferedEvent;
use tokio::sync::Notify;

struct Inner {
    capacity: usize,
    queue: Mutex<VecDeque<BufferedEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

/// The manager's handle onto one subscriber's delivery channel.
#[derive(Clone)]
pub struct DeliverySender(Arc<Inner>);

/// The consumer's handle onto its own delivery channel.
pub struct DeliveryReceiver(Arc<Inner>);

pub fn channel(capacity: usize) -> (DeliverySender, DeliveryReceiver) {
    let inner = Arc::new(Inner {
        capacity,
        queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (DeliverySender(inner.clone()), DeliveryReceiver(inner))
}

/// Outcome of a single delivery attempt (spec §4.1 step 5 / §8 property 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered with room to spare.
    Delivered,
    /// Delivered after the oldest pending item was dropped to make room.
    DeliveredAfterDrop,
    /// The consumer is gone; the subscriber should be torn down.
    Closed,
}

impl DeliverySender {
    /// Non-blocking send; on full, drops the oldest queued item and retries
    /// once. The retry cannot itself report "full" under this
    /// implementation (the pop always frees a slot for capacity >= 1); it
    /// only reports `Closed` when the receiver has gone away, which is the
    /// one case spec §4.1 step 5 calls "terminally slow".
    pub fn try_send_with_drop_oldest(&self, event: BufferedEvent) -> SendOutcome {
        if self.0.closed.load(Ordering::Acquire) || self.0.capacity == 0 {
            return SendOutcome::Closed;
        }
        let mut queue = self.0.queue.lock().expect("delivery queue poisoned");
        let dropped_oldest = queue.len() >= self.0.capacity;
        if dropped_oldest {
            queue.pop_front();
        }
        queue.push_back(event);
        drop(queue);
        self.0.notify.notify_one();
        if dropped_oldest {
            SendOutcome::DeliveredAfterDrop
        } else {
            SendOutcome::Delivered
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }
}

impl DeliveryReceiver {
    /// Awaits the next buffered event, or `None` once the sender side has
    /// been torn down and the queue has drained.
    pub async fn recv(&mut self) -> Option<BufferedEvent> {
        loop {
            {
                let mut queue = self.0.queue.lock().expect("delivery queue poisoned");
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if self.0.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.0.notify.notified().await;
        }
    }
}

impl Drop for DeliveryReceiver {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_protocol::EventEntry;

    fn entry(seq: u64) -> BufferedEvent {
        BufferedEvent {
            sequence: seq,
            entry: EventEntry {
                kind: "Event".to_owned(),
                name: format!("e{seq}"),
                namespace: None,
                event_type: "Normal".to_owned(),
                source: "test".to_owned(),
                reason: "Test".to_owned(),
                message: String::new(),
                age: "0s".to_owned(),
                created_at_ms: 0,
                cluster_id: "c1".to_owned(),
                cluster_name: "c1".to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn delivers_in_order_when_not_full() {
        let (tx, mut rx) = channel(4);
        for seq in 1..=3 {
            assert_eq!(
                tx.try_send_with_drop_oldest(entry(seq)),
                SendOutcome::Delivered
            );
        }
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(rx.recv().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn full_channel_drops_oldest_then_delivers_newest() {
        let (tx, mut rx) = channel(2);
        assert_eq!(tx.try_send_with_drop_oldest(entry(1)), SendOutcome::Delivered);
        assert_eq!(tx.try_send_with_drop_oldest(entry(2)), SendOutcome::Delivered);
        assert_eq!(
            tx.try_send_with_drop_oldest(entry(3)),
            SendOutcome::DeliveredAfterDrop
        );
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(rx.recv().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn closed_receiver_makes_sends_report_closed() {
        let (tx, rx) = channel(2);
        drop(rx);
        assert_eq!(tx.try_send_with_drop_oldest(entry(1)), SendOutcome::Closed);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn zero_capacity_channel_is_always_closed() {
        let (tx, _rx) = channel(0);
        assert_eq!(tx.try_send_with_drop_oldest(entry(1)), SendOutcome::Closed);
    }
}
