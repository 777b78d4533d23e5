//! Bounded per-subscriber pending FIFO with per-priority sub-limits.

use std::collections::VecDeque;

use herald_core::error::{HeraldError, Result};
use herald_core::route::Priority;

use crate::config::schema::{OverflowPolicy, QueueSection};

use super::OutboundMessage;

/// Effective limits snapshot taken from configuration per delivery call.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_pending: usize,
    pub per_class: [usize; 4],
    pub policy: OverflowPolicy,
}

impl From<&QueueSection> for QueueLimits {
    fn from(q: &QueueSection) -> Self {
        Self {
            max_pending: q.max_pending,
            // Indexed by class_index(): low, normal, high, critical.
            per_class: [q.low, q.normal, q.high, q.critical],
            policy: q.overflow_policy,
        }
    }
}

fn class_index(p: Priority) -> usize {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

/// One queued, not-yet-delivered message.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: OutboundMessage,
    pub enqueued_at_ms: u64,
}

/// Submission-order FIFO. Counts per priority class are maintained so the
/// sub-limit check stays O(1).
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<QueuedMessage>,
    class_counts: [usize; 4],
}

/// What `enqueue` did to make room, if anything.
pub struct Enqueued {
    pub dropped: Option<QueuedMessage>,
}

impl PendingQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a message, enforcing the total bound and the class sub-limit.
    /// With `DropOldest` the evicted message is returned so the caller can
    /// account for it; with `RejectNew` a full queue is an error.
    pub fn enqueue(
        &mut self,
        message: OutboundMessage,
        now_ms: u64,
        limits: &QueueLimits,
    ) -> Result<Enqueued> {
        let class = class_index(message.priority_class());

        let class_full = self.class_counts[class] >= limits.per_class[class];
        let total_full = self.items.len() >= limits.max_pending;

        let dropped = if class_full || total_full {
            match limits.policy {
                OverflowPolicy::RejectNew => {
                    return Err(HeraldError::QueueFull(message.message_id().to_string()))
                }
                OverflowPolicy::DropOldest => {
                    // Evict within the offending class when the sub-limit
                    // tripped, otherwise the overall oldest.
                    if class_full {
                        self.remove_oldest_of_class(class)
                    } else {
                        self.pop_front()
                    }
                }
            }
        } else {
            None
        };

        self.class_counts[class] += 1;
        self.items.push_back(QueuedMessage {
            message,
            enqueued_at_ms: now_ms,
        });
        Ok(Enqueued { dropped })
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        let item = self.items.pop_front()?;
        self.class_counts[class_index(item.message.priority_class())] -= 1;
        Some(item)
    }

    /// Put a message back at the head (drain backed off on a full outbox).
    pub fn push_front(&mut self, item: QueuedMessage) {
        self.class_counts[class_index(item.message.priority_class())] += 1;
        self.items.push_front(item);
    }

    fn remove_oldest_of_class(&mut self, class: usize) -> Option<QueuedMessage> {
        let pos = self
            .items
            .iter()
            .position(|q| class_index(q.message.priority_class()) == class)?;
        let item = self.items.remove(pos)?;
        self.class_counts[class] -= 1;
        Some(item)
    }

    /// Take everything, submission order preserved.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.class_counts = [0; 4];
        self.items.drain(..).collect()
    }

    /// Drop queued messages whose route has expired. Returns how many.
    pub fn drop_expired(&mut self, now_ms: u64) -> usize {
        let before = self.items.len();
        let mut kept = VecDeque::with_capacity(before);
        let mut counts = [0usize; 4];
        for item in self.items.drain(..) {
            if item.message.envelope.is_expired(now_ms) {
                continue;
            }
            counts[class_index(item.message.priority_class())] += 1;
            kept.push_back(item);
        }
        self.items = kept;
        self.class_counts = counts;
        before - self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use herald_core::compress::Algorithm;
    use herald_core::{Envelope, Route};

    fn msg(priority: u8) -> OutboundMessage {
        OutboundMessage {
            envelope: Arc::new(Envelope::new(
                "t",
                Route::unicast("u1").with_priority(priority),
                Bytes::from_static(b"x"),
            )),
            algorithm: Algorithm::None,
        }
    }

    fn limits(max: usize, policy: OverflowPolicy) -> QueueLimits {
        QueueLimits {
            max_pending: max,
            per_class: [max, max, max, max],
            policy,
        }
    }

    #[test]
    fn reject_new_errors_when_full() {
        let mut q = PendingQueue::default();
        let l = limits(2, OverflowPolicy::RejectNew);
        q.enqueue(msg(128), 0, &l).unwrap();
        q.enqueue(msg(128), 0, &l).unwrap();
        assert!(matches!(
            q.enqueue(msg(128), 0, &l),
            Err(HeraldError::QueueFull(_))
        ));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drop_oldest_keeps_bound() {
        let mut q = PendingQueue::default();
        let l = limits(2, OverflowPolicy::DropOldest);
        let first = msg(128);
        let first_id = first.message_id().to_string();
        q.enqueue(first, 0, &l).unwrap();
        q.enqueue(msg(128), 1, &l).unwrap();
        let out = q.enqueue(msg(128), 2, &l).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(out.dropped.unwrap().message.message_id(), first_id);
    }

    #[test]
    fn class_sub_limit_evicts_within_class() {
        let mut q = PendingQueue::default();
        let l = QueueLimits {
            max_pending: 10,
            per_class: [10, 1, 10, 10], // one normal slot
            policy: OverflowPolicy::DropOldest,
        };
        q.enqueue(msg(250), 0, &l).unwrap(); // critical, stays
        let old_normal = msg(128);
        let old_id = old_normal.message_id().to_string();
        q.enqueue(old_normal, 1, &l).unwrap();
        let out = q.enqueue(msg(128), 2, &l).unwrap();
        assert_eq!(out.dropped.unwrap().message.message_id(), old_id);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_preserves_order_and_resets() {
        let mut q = PendingQueue::default();
        let l = limits(10, OverflowPolicy::DropOldest);
        let ids: Vec<String> = (0..3)
            .map(|i| {
                let m = msg(128);
                let id = m.message_id().to_string();
                q.enqueue(m, i, &l).unwrap();
                id
            })
            .collect();
        let drained = q.drain();
        assert!(q.is_empty());
        assert_eq!(
            drained.iter().map(|d| d.message.message_id().to_string()).collect::<Vec<_>>(),
            ids
        );
    }

    #[test]
    fn drop_expired_counts() {
        let mut q = PendingQueue::default();
        let l = limits(10, OverflowPolicy::DropOldest);
        let expired = OutboundMessage {
            envelope: Arc::new(Envelope::new(
                "t",
                Route::unicast("u1").with_expiry_ms(5),
                Bytes::from_static(b"x"),
            )),
            algorithm: Algorithm::None,
        };
        q.enqueue(expired, 0, &l).unwrap();
        q.enqueue(msg(128), 0, &l).unwrap();
        assert_eq!(q.drop_expired(100), 1);
        assert_eq!(q.len(), 1);
    }
}
