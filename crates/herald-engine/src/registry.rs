//! Subscriber registry: active receivers, their filters, pause state, and
//! per-subscriber pending queues.
//!
//! Entries live in a `DashMap` (per-shard locking) and all per-entry state
//! is atomics plus one per-subscriber mutex around the pending queue, so
//! broadcast iteration and unrelated unicast deliveries do not contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use herald_core::error::{HeraldError, Result};
use herald_core::{now_ms, MessageFilter, MetaValue};

use crate::delivery::{OutboundMessage, PendingQueue};

/// One registered subscriber. The filter is immutable for the lifetime of
/// a registration (re-registering swaps the whole entry), so concurrent
/// readers always see a consistent snapshot.
#[derive(Debug)]
pub struct Registration {
    subscriber_id: String,
    subscription_id: String,
    filter: MessageFilter,
    metadata: HashMap<String, MetaValue>,
    online: AtomicBool,
    paused: AtomicBool,
    created_at_ms: u64,
    last_activity_ms: AtomicU64,
    outbox: mpsc::Sender<OutboundMessage>,
    pending: Mutex<PendingQueue>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Registration {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    pub fn metadata(&self) -> &HashMap<String, MetaValue> {
        &self.metadata
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub(crate) fn set_offline(&self) {
        self.online.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now: u64) {
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn outbox(&self) -> &mpsc::Sender<OutboundMessage> {
        &self.outbox
    }

    /// Run a closure under the pending-queue lock. A poisoned lock is
    /// recovered rather than propagated; delivery must not crash the
    /// process.
    pub(crate) fn with_pending<R>(&self, f: impl FnOnce(&mut PendingQueue) -> R) -> R {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn pending_count(&self) -> usize {
        self.with_pending(|q| q.len())
    }
}

/// Registry of active registrations, keyed by subscriber id.
pub struct SubscriberRegistry {
    entries: DashMap<String, Arc<Registration>>,
    strict: bool,
}

impl SubscriberRegistry {
    pub fn new(strict: bool) -> Self {
        Self {
            entries: DashMap::new(),
            strict,
        }
    }

    /// Create or replace a registration. Returns the entry plus the
    /// receiving half of its outbox. In strict mode a live entry wins and
    /// registration fails with `AlreadyActive`.
    pub fn register(
        &self,
        subscriber_id: &str,
        filter: MessageFilter,
        metadata: HashMap<String, MetaValue>,
        outbox_capacity: usize,
    ) -> Result<(Arc<Registration>, mpsc::Receiver<OutboundMessage>)> {
        if self.strict {
            if let Some(existing) = self.entries.get(subscriber_id) {
                if existing.is_online() {
                    return Err(HeraldError::AlreadyActive(subscriber_id.to_string()));
                }
            }
        }

        let (tx, rx) = mpsc::channel(outbox_capacity);
        let now = now_ms();
        let reg = Arc::new(Registration {
            subscriber_id: subscriber_id.to_string(),
            subscription_id: Uuid::new_v4().to_string(),
            filter,
            metadata,
            online: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            created_at_ms: now,
            last_activity_ms: AtomicU64::new(now),
            outbox: tx,
            pending: Mutex::new(PendingQueue::default()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        self.entries.insert(subscriber_id.to_string(), reg.clone());
        Ok((reg, rx))
    }

    /// Remove a registration and drop its pending queue. The subscription
    /// id must match the live entry; a stale unsubscribe is reported as
    /// not-found and leaves the newer registration alone.
    pub fn unregister(&self, subscriber_id: &str, subscription_id: &str) -> Result<Arc<Registration>> {
        let matches = self
            .entries
            .get(subscriber_id)
            .map(|e| e.subscription_id() == subscription_id)
            .unwrap_or(false);
        if !matches {
            return Err(HeraldError::NotFound(subscriber_id.to_string()));
        }
        self.entries
            .remove(subscriber_id)
            .map(|(_, reg)| reg)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))
    }

    pub fn lookup(&self, subscriber_id: &str) -> Option<Arc<Registration>> {
        self.entries.get(subscriber_id).map(|e| e.value().clone())
    }

    pub fn pause(&self, subscriber_id: &str) -> Result<Arc<Registration>> {
        let reg = self
            .lookup(subscriber_id)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))?;
        reg.paused.store(true, Ordering::Relaxed);
        Ok(reg)
    }

    pub fn resume(&self, subscriber_id: &str) -> Result<Arc<Registration>> {
        let reg = self
            .lookup(subscriber_id)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))?;
        reg.paused.store(false, Ordering::Relaxed);
        Ok(reg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count active registrations, optionally restricted by a metadata
    /// predicate. Used for capacity and targeting decisions.
    pub fn active_count(&self, predicate: Option<&dyn Fn(&HashMap<String, MetaValue>) -> bool>) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_online())
            .filter(|e| predicate.map(|p| p(e.metadata())).unwrap_or(true))
            .count()
    }

    /// Snapshot of online subscriber ids. Taken before fan-out so no
    /// registry lock is held across delivery handoff.
    pub fn online_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_online())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Iterate a snapshot of all registrations.
    pub fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Sum of all pending queues; the engine's backlog signal.
    pub fn pending_backlog(&self) -> usize {
        self.entries.iter().map(|e| e.pending_count()).sum()
    }

    /// Remove registrations idle for longer than `max_idle_ms`. Returns
    /// the evicted ids so membership can be cleaned up.
    pub fn evict_idle(&self, max_idle_ms: u64, now: u64) -> Vec<String> {
        if max_idle_ms == 0 {
            return Vec::new();
        }
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now.saturating_sub(e.last_activity_ms()) > max_idle_ms)
            .map(|e| e.key().clone())
            .collect();
        for id in &idle {
            self.entries.remove(id);
        }
        idle
    }
}
