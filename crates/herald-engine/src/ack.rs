//! Acknowledgment tracking for deliveries on ack-requiring routes.

use dashmap::DashMap;

use herald_core::now_ms;

use crate::delivery::OutboundMessage;

/// One outstanding unconfirmed delivery.
#[derive(Clone)]
pub struct AckEntry {
    pub message: OutboundMessage,
    pub subscriber_id: String,
    pub sent_at_ms: u64,
    /// Retry count of the delivery this entry belongs to.
    pub attempts: u32,
}

/// What an incoming acknowledgment matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Matched an outstanding delivery; recipient processed the message.
    Processed,
    /// Matched an outstanding delivery; recipient rejected the message.
    Rejected,
    /// No outstanding record. Accepted idempotently and ignored.
    Unmatched,
}

/// Tracker keyed by (message id, subscriber id).
#[derive(Default)]
pub struct AckTracker {
    entries: DashMap<(String, String), AckEntry>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unconfirmed delivery awaiting its ack.
    pub fn register(&self, message: OutboundMessage, subscriber_id: &str, attempts: u32) {
        let key = (message.message_id().to_string(), subscriber_id.to_string());
        self.entries.insert(
            key,
            AckEntry {
                message,
                subscriber_id: subscriber_id.to_string(),
                sent_at_ms: now_ms(),
                attempts,
            },
        );
    }

    /// Settle an outstanding delivery. A second ack for the same pair (or
    /// an ack for a delivery never tracked) returns `Unmatched` and has no
    /// further effect.
    pub fn acknowledge(
        &self,
        message_id: &str,
        subscriber_id: &str,
        processed: bool,
        result: Option<&str>,
    ) -> AckOutcome {
        let key = (message_id.to_string(), subscriber_id.to_string());
        match self.entries.remove(&key) {
            Some(_) => {
                if processed {
                    tracing::debug!(%message_id, %subscriber_id, "ack: processed");
                    AckOutcome::Processed
                } else {
                    tracing::debug!(%message_id, %subscriber_id, result, "ack: rejected");
                    AckOutcome::Rejected
                }
            }
            None => AckOutcome::Unmatched,
        }
    }

    /// Remove and return entries whose ack never arrived inside the
    /// per-type timeout. Consumed by the retry sweep.
    pub fn take_expired(&self, now: u64, timeout_for: impl Fn(&str) -> u64) -> Vec<AckEntry> {
        let due: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| {
                let timeout = timeout_for(e.message.msg_type());
                now.saturating_sub(e.sent_at_ms) > timeout
            })
            .map(|e| e.key().clone())
            .collect();

        due.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, entry)| entry))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}
