//! Retained message history and the external persistence seam.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use herald_core::error::Result;
use herald_core::filter::FilterVerdict;
use herald_core::{Envelope, MessageFilter};

use crate::delivery::OutboundMessage;

/// Opaque long-term store collaborator, keyed by message id and timestamp.
/// Only consulted when persistence is enabled; the engine never reads its
/// own writes on the hot path.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, envelope: &Envelope<Bytes>) -> Result<()>;
    async fn query(&self, since_ms: u64, limit: usize) -> Result<Vec<Envelope<Bytes>>>;
}

/// In-process store used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: tokio::sync::Mutex<VecDeque<Envelope<Bytes>>>,
    cap: usize,
}

impl MemoryStore {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: tokio::sync::Mutex::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, envelope: &Envelope<Bytes>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.cap {
            entries.pop_front();
        }
        entries.push_back(envelope.clone());
        Ok(())
    }

    async fn query(&self, since_ms: u64, limit: usize) -> Result<Vec<Envelope<Bytes>>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| e.created_at_ms >= since_ms)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Bounded in-memory ring of recently routed messages, replayed to new
/// subscribers that ask for history.
pub struct History {
    ring: Mutex<VecDeque<OutboundMessage>>,
    max: usize,
}

impl History {
    pub fn new(max: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            max: max.max(1),
        }
    }

    pub fn record(&self, message: OutboundMessage) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() >= self.max {
            ring.pop_front();
        }
        ring.push_back(message);
    }

    /// Most recent `limit` messages that pass the filter, submission order
    /// preserved.
    pub fn replay_for(&self, filter: &MessageFilter, limit: usize) -> Vec<OutboundMessage> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<OutboundMessage> = ring
            .iter()
            .filter(|m| filter.evaluate(&m.envelope) == FilterVerdict::Deliver)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use herald_core::compress::Algorithm;
    use herald_core::Route;

    fn msg(msg_type: &str, priority: u8) -> OutboundMessage {
        OutboundMessage {
            envelope: Arc::new(Envelope::new(
                msg_type,
                Route::broadcast().with_priority(priority),
                Bytes::from_static(b"x"),
            )),
            algorithm: Algorithm::None,
        }
    }

    #[test]
    fn ring_is_bounded() {
        let h = History::new(2);
        h.record(msg("a", 128));
        h.record(msg("b", 128));
        h.record(msg("c", 128));
        assert_eq!(h.len(), 2);
        let replay = h.replay_for(&MessageFilter::allow_all(), 10);
        let types: Vec<&str> = replay.iter().map(|m| m.msg_type()).collect();
        assert_eq!(types, vec!["b", "c"]);
    }

    #[test]
    fn replay_applies_filter_and_limit() {
        let h = History::new(10);
        h.record(msg("keep", 200));
        h.record(msg("drop", 10));
        h.record(msg("keep", 210));
        h.record(msg("keep", 220));

        let filter = MessageFilter::allow_all().with_min_priority(100);
        let replay = h.replay_for(&filter, 2);
        assert_eq!(replay.len(), 2);
        // Limit keeps the most recent matches, order preserved.
        let prios: Vec<u8> = replay.iter().map(|m| m.envelope.route.priority).collect();
        assert_eq!(prios, vec![210, 220]);
    }

    #[tokio::test]
    async fn memory_store_appends_and_queries() {
        let store = MemoryStore::new(10);
        let env = Envelope::new("t", Route::broadcast(), Bytes::from_static(b"x"));
        store.append(&env).await.unwrap();
        let all = store.query(0, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), env.id());
        let none = store.query(env.created_at_ms + 1, 10).await.unwrap();
        assert!(none.is_empty());
    }
}
