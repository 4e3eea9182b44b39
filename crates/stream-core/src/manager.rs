//! The fan-out manager (spec §4.1): per-scope subscriber sets and ring
//! buffers, sequence allocation, broadcast, and eviction-on-idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use stream_protocol::{BufferedEvent, EventEntry, ScopeKey};

use crate::channel::{self, DeliveryReceiver, DeliverySender, SendOutcome};
use crate::ring::RingBuffer;
use crate::telemetry::{NoopTelemetry, Telemetry};

/// Construction-time configuration, captured by value (spec §9
/// "avoid shared global state... config values read at construction").
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Ring buffer capacity `B` per scope.
    pub ring_capacity: usize,
    /// Subscriber delivery channel capacity `C`.
    pub subscriber_channel_capacity: usize,
    /// Max concurrent subscribers per scope.
    pub max_subscribers_per_scope: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 200,
            subscriber_channel_capacity: 64,
            max_subscribers_per_scope: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("scope already has the maximum of {max} subscribers")]
pub struct SubscriberLimitExceeded {
    pub max: usize,
}

struct ScopeState {
    subscribers: HashMap<u64, DeliverySender>,
    buffer: Option<RingBuffer>,
    next_sequence: u64,
}

impl ScopeState {
    fn fresh() -> Self {
        Self {
            subscribers: HashMap::new(),
            buffer: None,
            next_sequence: 1,
        }
    }

    fn allocate_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}

/// A live subscription: the consumer's half of the delivery channel.
pub struct Subscription {
    pub id: u64,
    pub receiver: DeliveryReceiver,
}

/// The producer's (manager-owned) handle used to release a subscription.
/// Dropping or calling `cancel` are both idempotent — removing an
/// already-removed id under the lock is simply a no-op.
pub struct CancelHandle {
    id: u64,
    scope: ScopeKey,
    manager: Arc<ManagerInner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.manager.unsubscribe(&self.scope, self.id);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.scope, self.id);
    }
}

/// Result of a single broadcast (spec §4.1 step 6: "count deliveries and
/// backlog drops").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// `None` when the scope was cold (no subscribers, no buffer): no
    /// sequence was consumed and nothing was buffered (spec §8 property 3).
    pub sequence: Option<u64>,
    pub delivered: usize,
    pub backlog_dropped: usize,
    pub closed_subscribers: usize,
}

impl BroadcastOutcome {
    fn cold() -> Self {
        Self {
            sequence: None,
            delivered: 0,
            backlog_dropped: 0,
            closed_subscribers: 0,
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    state: RwLock<HashMap<ScopeKey, ScopeState>>,
    next_subscriber_id: AtomicU64,
    telemetry: Arc<dyn Telemetry>,
}

impl ManagerInner {
    fn unsubscribe(&self, scope: &ScopeKey, id: u64) {
        let mut state = self.state.write().expect("manager lock poisoned");
        if let Some(scope_state) = state.get_mut(scope) {
            scope_state.subscribers.remove(&id);
            if scope_state.subscribers.is_empty() {
                // Cold-scope rule: with no subscribers left, nothing keeps
                // this scope's buffer or sequence counter alive.
                state.remove(scope);
            }
        }
    }
}

/// The fan-out manager. Cheap to clone; all state lives behind `Arc`.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_telemetry(config, Arc::new(NoopTelemetry))
    }

    pub fn with_telemetry(config: ManagerConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                state: RwLock::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                telemetry,
            }),
        }
    }

    /// `Subscribe(scope) -> (channel, cancel)`, spec §4.1.
    pub fn subscribe(
        &self,
        scope: &ScopeKey,
    ) -> Result<(Subscription, CancelHandle), SubscriberLimitExceeded> {
        let mut state = self.inner.state.write().expect("manager lock poisoned");
        let scope_state = state.entry(scope.clone()).or_insert_with(ScopeState::fresh);
        if scope_state.subscribers.len() >= self.inner.config.max_subscribers_per_scope {
            if scope_state.subscribers.is_empty() && scope_state.buffer.is_none() {
                state.remove(scope);
            }
            self.inner.telemetry.subscriber_limit_exceeded(scope);
            return Err(SubscriberLimitExceeded {
                max: self.inner.config.max_subscribers_per_scope,
            });
        }
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::channel(self.inner.config.subscriber_channel_capacity);
        scope_state.subscribers.insert(id, tx);
        drop(state);
        Ok((
            Subscription { id, receiver: rx },
            CancelHandle {
                id,
                scope: scope.clone(),
                manager: self.inner.clone(),
            },
        ))
    }

    /// `SubscribeWithResume(scope, since) -> (replay, channel, cancel, ok, limitExceeded)`.
    ///
    /// Atomic w.r.t. the manager lock: the replay snapshot and subscriber
    /// registration happen under one lock acquisition, so the first live
    /// event this subscriber can receive is guaranteed to have a sequence
    /// strictly greater than the last replayed one (spec §4.1 "Ordering and
    /// consistency properties").
    pub fn subscribe_with_resume(
        &self,
        scope: &ScopeKey,
        since: u64,
    ) -> ResumeSubscribeResult {
        if since == 0 {
            return match self.subscribe(scope) {
                Ok((sub, cancel)) => ResumeSubscribeResult::Ok {
                    replay: Vec::new(),
                    subscription: sub,
                    cancel,
                },
                Err(e) => ResumeSubscribeResult::LimitExceeded(e),
            };
        }

        let mut state = self.inner.state.write().expect("manager lock poisoned");
        let Some(scope_state) = state.get_mut(scope) else {
            return ResumeSubscribeResult::TooOld;
        };
        let Some(buffer) = scope_state.buffer.as_ref() else {
            return ResumeSubscribeResult::TooOld;
        };
        let Some(replay) = buffer.resume(since) else {
            return ResumeSubscribeResult::TooOld;
        };
        if scope_state.subscribers.len() >= self.inner.config.max_subscribers_per_scope {
            self.inner.telemetry.subscriber_limit_exceeded(scope);
            return ResumeSubscribeResult::LimitExceeded(SubscriberLimitExceeded {
                max: self.inner.config.max_subscribers_per_scope,
            });
        }
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::channel(self.inner.config.subscriber_channel_capacity);
        scope_state.subscribers.insert(id, tx);
        drop(state);
        ResumeSubscribeResult::Ok {
            replay,
            subscription: Subscription { id, receiver: rx },
            cancel: CancelHandle {
                id,
                scope: scope.clone(),
                manager: self.inner.clone(),
            },
        }
    }

    /// `Resume(scope, since) -> (events, ok)`, without subscribing.
    pub fn resume(&self, scope: &ScopeKey, since: u64) -> Option<Vec<BufferedEvent>> {
        let state = self.inner.state.read().expect("manager lock poisoned");
        let scope_state = state.get(scope)?;
        let buffer = scope_state.buffer.as_ref()?;
        buffer.resume(since)
    }

    /// `NextSequence(scope) -> u64`. Reserves a sequence for non-event
    /// payloads (e.g. an initial snapshot) under the write lock.
    pub fn next_sequence(&self, scope: &ScopeKey) -> u64 {
        let mut state = self.inner.state.write().expect("manager lock poisoned");
        let scope_state = state.entry(scope.clone()).or_insert_with(ScopeState::fresh);
        scope_state.allocate_sequence()
    }

    /// Publish `entry` for `scope` (spec §4.1 "Broadcast algorithm").
    pub fn broadcast(&self, scope: &ScopeKey, entry: EventEntry) -> BroadcastOutcome {
        let buffered;
        let snapshot: Vec<(u64, DeliverySender)>;
        {
            let mut state = self.inner.state.write().expect("manager lock poisoned");
            let Some(scope_state) = state.get_mut(scope) else {
                // Cold-scope rule: no subscriber set and no buffer means
                // this publish doesn't consume a sequence or allocate state.
                return BroadcastOutcome::cold();
            };
            let should_buffer = !scope_state.subscribers.is_empty() || scope_state.buffer.is_some();
            if !should_buffer {
                return BroadcastOutcome::cold();
            }
            let seq = scope_state.allocate_sequence();
            let buffer = scope_state
                .buffer
                .get_or_insert_with(|| RingBuffer::new(self.inner.config.ring_capacity));
            buffered = BufferedEvent { sequence: seq, entry };
            buffer.push(buffered.clone());
            snapshot = scope_state
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect();
        }

        let mut delivered = 0;
        let mut backlog_dropped = 0;
        let mut closed_ids = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send_with_drop_oldest(buffered.clone()) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::DeliveredAfterDrop => {
                    delivered += 1;
                    backlog_dropped += 1;
                }
                SendOutcome::Closed => closed_ids.push(id),
            }
        }
        let closed_subscribers = closed_ids.len();
        for id in closed_ids {
            self.inner.unsubscribe(scope, id);
        }
        self.inner
            .telemetry
            .broadcast(scope, delivered, backlog_dropped, closed_subscribers);

        BroadcastOutcome {
            sequence: Some(buffered.sequence),
            delivered,
            backlog_dropped,
            closed_subscribers,
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, scope: &ScopeKey) -> usize {
        let state = self.inner.state.read().unwrap();
        state.get(scope).map(|s| s.subscribers.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn has_scope_state(&self, scope: &ScopeKey) -> bool {
        self.inner.state.read().unwrap().contains_key(scope)
    }
}

pub enum ResumeSubscribeResult {
    Ok {
        replay: Vec<BufferedEvent>,
        subscription: Subscription,
        cancel: CancelHandle,
    },
    /// Token too old, or the scope/buffer doesn't exist: no subscriber was
    /// registered.
    TooOld,
    LimitExceeded(SubscriberLimitExceeded),
}
