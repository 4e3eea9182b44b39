//! Bounded per-scope ring buffer (spec §3, §4.1, §8).
//!
//! Capacity `B` is fixed at construction. On overflow the oldest retained
//! entry is discarded and the new entry appended; sequences are strictly
//! increasing within a buffer.

use std::collections::VecDeque;

use stream_protocol::BufferedEvent;

/// A bounded FIFO of `BufferedEvent`s for one scope.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    entries: VecDeque<BufferedEvent>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Appends `event`, evicting the oldest entry if the buffer is already
    /// at capacity. A capacity of 0 silently discards all appends (spec §8
    /// boundary behavior).
    pub fn push(&mut self, event: BufferedEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }

    pub fn latest(&self) -> Option<u64> {
        self.entries.back().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resume lookup: `since = S` is satisfied iff `S >= oldest - 1`.
    /// Returns `Some(replay)` (possibly empty, when `S >= latest`) on
    /// success, `None` when `S < oldest` and the caller must rebuild.
    pub fn resume(&self, since: u64) -> Option<Vec<BufferedEvent>> {
        match (self.oldest(), self.latest()) {
            (None, _) => {
                // Cold/empty buffer: only `since == 0` (no resume) is
                // trivially satisfiable, but an empty buffer for a scope
                // that exists never happens post-first-publish; treat any
                // token as "too old" except the no-op token 0.
                if since == 0 {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            (Some(oldest), Some(latest)) => {
                if since < oldest.saturating_sub(1) {
                    return None;
                }
                if since > latest {
                    return Some(Vec::new());
                }
                Some(
                    self.entries
                        .iter()
                        .filter(|e| e.sequence > since)
                        .cloned()
                        .collect(),
                )
            }
            (Some(_), None) => unreachable!("oldest and latest are both derived from the same deque"),
        }
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
                message: format!("message {seq}"),
                age: "0s".to_owned(),
                created_at_ms: 0,
                cluster_id: "c1".to_owned(),
                cluster_name: "c1".to_owned(),
            },
        }
    }

    #[test]
    fn retains_min_of_count_and_capacity_and_oldest_le_latest() {
        let mut ring = RingBuffer::new(3);
        for seq in 1..=5 {
            ring.push(entry(seq));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest(), Some(3));
        assert_eq!(ring.latest(), Some(5));
        assert!(ring.oldest().unwrap() <= ring.latest().unwrap());
    }

    #[test]
    fn capacity_zero_discards_all_appends() {
        let mut ring = RingBuffer::new(0);
        ring.push(entry(1));
        ring.push(entry(2));
        assert!(ring.is_empty());
    }

    #[test]
    fn resume_since_ge_latest_returns_empty_ok() {
        let mut ring = RingBuffer::new(2);
        ring.push(entry(4));
        ring.push(entry(5));
        assert_eq!(ring.resume(5), Some(Vec::new()));
        assert_eq!(ring.resume(9), Some(Vec::new()));
    }

    #[test]
    fn resume_since_lt_oldest_minus_one_fails() {
        let mut ring = RingBuffer::new(2);
        ring.push(entry(4));
        ring.push(entry(5));
        assert_eq!(ring.resume(1), None);
    }

    #[test]
    fn resume_exactly_at_oldest_minus_one_replays_everything() {
        let mut ring = RingBuffer::new(2);
        ring.push(entry(4));
        ring.push(entry(5));
        let replay = ring.resume(3).unwrap();
        assert_eq!(
            replay.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn resume_mid_buffer_returns_strictly_greater_tail() {
        let mut ring = RingBuffer::new(3);
        for seq in 1..=3 {
            ring.push(entry(seq));
        }
        let replay = ring.resume(1).unwrap();
        assert_eq!(
            replay.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }
}
