//! The per-session outgoing queue (spec §4.3 "Backpressure on the
//! outgoing queue"): multiple producers (forwarders, the write loop's own
//! heartbeat), single consumer (the write loop).
//!
//! On full: a `HEARTBEAT` is simply dropped. Anything else drops the
//! *oldest* queued message and enqueues a `RESET` for that message's
//! domain/scope in its place, so the client knows to resync just that one
//! scope; the message that triggered the drop is not queued either, since
//! the resync the `RESET` causes will pick it up. The session stays open
//! either way.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use stream_protocol::{ServerEnvelope, ServerMessage};
use tokio::sync::Notify;

pub struct OutgoingQueue {
    capacity: usize,
    queue: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutgoingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues `msg`; on full, drops the oldest message and enqueues a
    /// `RESET` for its scope in its place instead. `msg` itself is not
    /// queued in that case: the client will pick it up in the resync the
    /// `RESET` triggers.
    pub fn push(&self, msg: ServerMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock().expect("outgoing queue poisoned");
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                let (domain, scope) = dropped.domain_scope();
                let reset = ServerMessage::Reset(ServerEnvelope::for_scope(domain, scope));
                queue.push_front(reset);
            }
            drop(queue);
            self.notify.notify_one();
            return;
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }

    /// Heartbeats never trigger a drop-oldest cascade: if the queue is
    /// full, the new heartbeat is simply discarded.
    pub fn push_heartbeat(&self, msg: ServerMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock().expect("outgoing queue poisoned");
        if queue.len() >= self.capacity {
            return;
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut queue = self.queue.lock().expect("outgoing queue poisoned");
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}
