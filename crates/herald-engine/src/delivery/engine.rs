//! Per-recipient delivery pipeline, batch delivery, and retry bookkeeping.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use herald_core::compress::{compress, Algorithm, CompressionPolicy};
use herald_core::error::{HeraldError, Result};
use herald_core::filter::FilterVerdict;
use herald_core::{now_ms, Envelope};

use crate::ack::AckTracker;
use crate::config::schema::TimeoutSection;
use crate::config::EngineConfig;
use crate::history::History;
use crate::membership::Membership;
use crate::registry::{Registration, SubscriberRegistry};
use crate::resolver::resolve;
use crate::stats::EngineStats;

use super::outcome::{BatchRouteResult, DeliveryOutcome, DeliveryStatus, RouteResult};
use super::queue::{QueueLimits, QueuedMessage};
use super::OutboundMessage;

/// Options for one batch delivery call.
#[derive(Clone)]
pub struct BatchOptions {
    /// Abort remaining messages on the first failed route.
    pub fail_fast: bool,
    /// Cooperative cancellation: undispatched messages are abandoned,
    /// already-dispatched deliveries are not rolled back.
    pub cancel: CancellationToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// A terminally-failed delivery retained for operator inspection and
/// manual retry.
#[derive(Clone)]
pub struct FailedDelivery {
    pub message: OutboundMessage,
    pub subscriber_id: String,
    pub reason: String,
    pub failed_at_ms: u64,
    pub attempts: u32,
}

struct RetryEntry {
    message: OutboundMessage,
    subscriber_id: String,
    due_at_ms: u64,
    attempts: u32,
}

/// Configuration snapshot taken once per call so no lock is held across
/// delivery handoff or compression.
struct DeliveryParams {
    queue_limits: QueueLimits,
    max_attempts: u32,
    retry_delay_ms: u64,
    handoff_timeout_ms: u64,
    compression: CompressionPolicy,
    timeouts: TimeoutSection,
    idle_eviction_ms: u64,
    failed_ring: usize,
}

fn done(
    message_id: String,
    subscriber_id: String,
    start: Instant,
    status: DeliveryStatus,
    reason: Option<&str>,
) -> DeliveryOutcome {
    DeliveryOutcome {
        message_id,
        subscriber_id,
        status,
        reason: reason.map(str::to_string),
        elapsed_micros: start.elapsed().as_micros() as u64,
    }
}

/// Drives per-recipient delivery attempts: filtering, queuing, handoff,
/// acknowledgment registration, retries.
pub struct DeliveryEngine {
    registry: Arc<SubscriberRegistry>,
    membership: Arc<Membership>,
    ack: Arc<AckTracker>,
    stats: Arc<EngineStats>,
    history: Arc<History>,
    config: Arc<RwLock<EngineConfig>>,
    retries: Mutex<VecDeque<RetryEntry>>,
    failed: Mutex<VecDeque<FailedDelivery>>,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        membership: Arc<Membership>,
        ack: Arc<AckTracker>,
        stats: Arc<EngineStats>,
        history: Arc<History>,
        config: Arc<RwLock<EngineConfig>>,
    ) -> Self {
        Self {
            registry,
            membership,
            ack,
            stats,
            history,
            config,
            retries: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
        }
    }

    fn params(&self) -> DeliveryParams {
        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
        DeliveryParams {
            queue_limits: QueueLimits::from(&cfg.queues),
            max_attempts: cfg.retry.max_attempts,
            retry_delay_ms: cfg.retry.delay_ms,
            handoff_timeout_ms: cfg.queues.handoff_timeout_ms,
            compression: cfg.compression.policy(),
            timeouts: cfg.timeouts.clone(),
            idle_eviction_ms: cfg.registry.idle_eviction_ms,
            failed_ring: cfg.history.max_size,
        }
    }

    /// Route one envelope to its resolved recipients.
    ///
    /// Request-level malformation (empty id, invalid route shape) fails the
    /// whole call; per-recipient errors are aggregated into the result and
    /// never abort the fan-out.
    pub async fn deliver(&self, mut envelope: Envelope<Bytes>) -> Result<RouteResult> {
        let start = Instant::now();
        if envelope.id().is_empty() {
            return Err(HeraldError::BadRequest("empty message id".into()));
        }
        envelope.route.validate()?;

        let params = self.params();
        self.stats
            .record_send(&envelope.msg_type, envelope.priority_class());

        // Preprocess the payload once; every recipient shares the result.
        let priority = envelope.priority_class();
        let algorithm = match envelope.take_payload() {
            Some(payload) => {
                let (bytes, decision) = compress(payload, priority, &params.compression);
                if decision.algorithm != Algorithm::None {
                    tracing::debug!(
                        message_id = %envelope.id(),
                        algo = decision.algorithm.as_str(),
                        original = decision.original_size,
                        compressed = decision.compressed_size,
                        "payload compressed"
                    );
                }
                envelope.set_payload(bytes);
                decision.algorithm
            }
            None => Algorithm::None,
        };

        let message = OutboundMessage {
            envelope: Arc::new(envelope),
            algorithm,
        };
        self.history.record(message.clone());

        let recipients = resolve(&message.envelope.route, &self.registry, &self.membership)?;

        let mut futs = FuturesUnordered::new();
        for recipient in recipients {
            futs.push(self.attempt(recipient, message.clone(), 0, &params));
        }
        let mut outcomes = Vec::new();
        while let Some(outcome) = futs.next().await {
            self.stats.record_outcome(outcome.status, outcome.elapsed_micros);
            outcomes.push(outcome);
        }

        let result = RouteResult::from_outcomes(&outcomes, start.elapsed().as_millis() as u64);
        tracing::debug!(
            message_id = %message.message_id(),
            kind = message.envelope.route.kind.as_str(),
            delivered = result.delivered,
            queued = result.queued,
            filtered = result.filtered,
            failed = result.failed,
            "route complete"
        );
        Ok(result)
    }

    /// Deliver a batch; each message is routed independently unless
    /// `fail_fast` aborts after a failed route.
    pub async fn deliver_batch(
        &self,
        envelopes: Vec<Envelope<Bytes>>,
        opts: BatchOptions,
    ) -> BatchRouteResult {
        let start = Instant::now();
        let total = envelopes.len();
        let mut batch = BatchRouteResult::default();
        let mut processed = 0usize;

        for envelope in envelopes {
            if opts.cancel.is_cancelled() {
                tracing::info!(remaining = total - processed, "batch cancelled");
                break;
            }
            let kind = envelope.route.kind;
            let result = match self.deliver(envelope).await {
                Ok(r) => r,
                Err(e) => RouteResult {
                    success: false,
                    errors: vec![format!("{} ({})", e, e.code().as_str())],
                    ..RouteResult::default()
                },
            };
            let ok = result.success;
            batch.record(kind, result);
            processed += 1;
            if opts.fail_fast && !ok {
                break;
            }
        }

        batch.aborted = total - processed;
        batch.duration_ms = start.elapsed().as_millis() as u64;
        batch
    }

    /// One message-recipient attempt. `prior_attempts` counts failures the
    /// pair has already accumulated (retry sweep passes the running count).
    async fn attempt(
        &self,
        subscriber_id: String,
        message: OutboundMessage,
        prior_attempts: u32,
        params: &DeliveryParams,
    ) -> DeliveryOutcome {
        let start = Instant::now();
        let now = now_ms();
        let message_id = message.message_id().to_string();

        if message.envelope.is_expired(now) {
            return done(message_id, subscriber_id, start, DeliveryStatus::Failed, Some("expired"));
        }

        let Some(reg) = self.registry.lookup(&subscriber_id) else {
            return done(
                message_id,
                subscriber_id,
                start,
                DeliveryStatus::Failed,
                Some("unknown subscriber"),
            );
        };
        reg.touch(now);

        if reg.is_paused() {
            let enqueued = reg.with_pending(|q| q.enqueue(message.clone(), now, &params.queue_limits));
            return match enqueued {
                Ok(enq) => {
                    if let Some(dropped) = enq.dropped {
                        // The displaced message is lost; account for it.
                        reg.mark_failed();
                        self.stats.record_outcome(DeliveryStatus::Failed, 0);
                        tracing::warn!(
                            subscriber = %subscriber_id,
                            dropped_id = %dropped.message.message_id(),
                            "pending queue overflow, dropped oldest"
                        );
                    }
                    done(message_id, subscriber_id, start, DeliveryStatus::Queued, None)
                }
                Err(_) => {
                    reg.mark_failed();
                    done(
                        message_id,
                        subscriber_id,
                        start,
                        DeliveryStatus::Failed,
                        Some("queue full"),
                    )
                }
            };
        }

        if let FilterVerdict::Filtered(reason) = reg.filter().evaluate(&message.envelope) {
            return done(message_id, subscriber_id, start, DeliveryStatus::Filtered, Some(reason));
        }

        match self.handoff(&reg, message.clone(), params).await {
            Ok(()) => {
                reg.mark_delivered();
                if message.envelope.route.require_ack {
                    self.ack.register(message, &subscriber_id, prior_attempts);
                    done(message_id, subscriber_id, start, DeliveryStatus::AwaitingAck, None)
                } else {
                    done(message_id, subscriber_id, start, DeliveryStatus::Delivered, None)
                }
            }
            Err(reason) => {
                reg.mark_failed();
                self.note_failure(message, &subscriber_id, prior_attempts, reason, params);
                done(message_id, subscriber_id, start, DeliveryStatus::Failed, Some(reason))
            }
        }
    }

    /// Hand the message to the subscriber's transport. Ack-requiring routes
    /// may briefly wait on a full outbox; best-effort routes never block.
    async fn handoff(
        &self,
        reg: &Arc<Registration>,
        message: OutboundMessage,
        params: &DeliveryParams,
    ) -> std::result::Result<(), &'static str> {
        match reg.outbox().try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                reg.set_offline();
                Err("subscriber offline")
            }
            Err(TrySendError::Full(message)) => {
                if !message.envelope.route.require_ack {
                    return Err("outbox full");
                }
                match timeout(
                    Duration::from_millis(params.handoff_timeout_ms),
                    reg.outbox().send(message),
                )
                .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => {
                        reg.set_offline();
                        Err("subscriber offline")
                    }
                    Err(_) => Err("outbox full"),
                }
            }
        }
    }

    /// Schedule a retry for a transient failure, or park the message in the
    /// failed ring once attempts run out.
    fn note_failure(
        &self,
        message: OutboundMessage,
        subscriber_id: &str,
        prior_attempts: u32,
        reason: &str,
        params: &DeliveryParams,
    ) {
        let attempts = prior_attempts + 1;
        if attempts < params.max_attempts {
            let due_at_ms = now_ms() + params.retry_delay_ms * attempts as u64;
            let mut retries = self.retries.lock().unwrap_or_else(|e| e.into_inner());
            retries.push_back(RetryEntry {
                message,
                subscriber_id: subscriber_id.to_string(),
                due_at_ms,
                attempts,
            });
            self.stats.record_retry();
            tracing::debug!(subscriber = %subscriber_id, attempts, reason, "retry scheduled");
        } else {
            self.push_failed(message, subscriber_id, reason, attempts, params);
        }
    }

    fn push_failed(
        &self,
        message: OutboundMessage,
        subscriber_id: &str,
        reason: &str,
        attempts: u32,
        params: &DeliveryParams,
    ) {
        tracing::warn!(
            message_id = %message.message_id(),
            subscriber = %subscriber_id,
            attempts,
            reason,
            "terminally failed"
        );
        let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        if failed.len() >= params.failed_ring {
            failed.pop_front();
        }
        failed.push_back(FailedDelivery {
            message,
            subscriber_id: subscriber_id.to_string(),
            reason: reason.to_string(),
            failed_at_ms: now_ms(),
            attempts,
        });
    }

    /// Re-attempt due retries and time out unacknowledged deliveries.
    /// Driven by the retry sweep; callers never block for the retry
    /// horizon.
    pub async fn run_retry_sweep(&self) {
        let params = self.params();
        let now = now_ms();

        let due: Vec<RetryEntry> = {
            let mut retries = self.retries.lock().unwrap_or_else(|e| e.into_inner());
            let all = std::mem::take(&mut *retries);
            let mut due = Vec::new();
            for entry in all {
                if entry.due_at_ms <= now {
                    due.push(entry);
                } else {
                    retries.push_back(entry);
                }
            }
            due
        };

        for entry in due {
            let outcome = self
                .attempt(entry.subscriber_id, entry.message, entry.attempts, &params)
                .await;
            self.stats.record_outcome(outcome.status, outcome.elapsed_micros);
        }

        // Unconfirmed deliveries past their timeout behave like transient
        // delivery failures: retried while attempts remain.
        let expired = self.ack.take_expired(now, |t| params.timeouts.for_type(t));
        for entry in expired {
            tracing::debug!(
                message_id = %entry.message.message_id(),
                subscriber = %entry.subscriber_id,
                "acknowledgment timed out"
            );
            self.stats.record_outcome(DeliveryStatus::Failed, 0);
            self.note_failure(
                entry.message,
                &entry.subscriber_id,
                entry.attempts,
                "ack timeout",
                &params,
            );
        }
    }

    /// Drop expired queued messages and evict idle registrations.
    pub async fn run_cleanup(&self) {
        let params = self.params();
        let now = now_ms();

        let mut dropped = 0usize;
        for reg in self.registry.snapshot() {
            dropped += reg.with_pending(|q| q.drop_expired(now));
        }
        if dropped > 0 {
            for _ in 0..dropped {
                self.stats.record_outcome(DeliveryStatus::Failed, 0);
            }
            tracing::debug!(dropped, "expired queued messages discarded");
        }

        let evicted = self.registry.evict_idle(params.idle_eviction_ms, now);
        for id in evicted {
            self.membership.remove(&id);
            tracing::info!(subscriber = %id, "evicted idle registration");
        }
    }

    /// Drain and discard a subscriber's pending queue. Returns the count
    /// removed.
    pub fn clear_queue(&self, subscriber_id: &str) -> Result<usize> {
        let reg = self
            .registry
            .lookup(subscriber_id)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))?;
        let drained = reg.with_pending(|q| q.drain());
        Ok(drained.len())
    }

    pub fn pending_count(&self, subscriber_id: &str) -> Result<usize> {
        self.registry
            .lookup(subscriber_id)
            .map(|r| r.pending_count())
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))
    }

    /// Push queued messages of a resumed subscriber into its outbox,
    /// submission order preserved. Stops (and re-queues the rest) when the
    /// outbox fills up; the next resume or delivery continues the drain.
    pub fn drain_pending(&self, subscriber_id: &str) -> Result<usize> {
        let reg = self
            .registry
            .lookup(subscriber_id)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))?;

        let drained = reg.with_pending(|q| q.drain());
        let now = now_ms();
        let mut delivered = 0usize;
        let mut back: Vec<QueuedMessage> = Vec::new();
        let mut iter = drained.into_iter();

        for item in iter.by_ref() {
            if item.message.envelope.is_expired(now) {
                reg.mark_failed();
                self.stats.record_outcome(DeliveryStatus::Failed, 0);
                continue;
            }
            match reg.outbox().try_send(item.message.clone()) {
                Ok(()) => {
                    reg.mark_delivered();
                    if item.message.envelope.route.require_ack {
                        self.ack.register(item.message, subscriber_id, 0);
                        self.stats.record_outcome(DeliveryStatus::AwaitingAck, 0);
                    } else {
                        self.stats.record_outcome(DeliveryStatus::Delivered, 0);
                    }
                    delivered += 1;
                }
                Err(_) => {
                    back.push(item);
                    break;
                }
            }
        }
        back.extend(iter);

        if !back.is_empty() {
            let limits = self.params().queue_limits;
            reg.with_pending(|q| {
                for item in back {
                    // Queue was just drained; push_back preserves order.
                    let _ = q.enqueue(item.message, item.enqueued_at_ms, &limits);
                }
            });
        }
        Ok(delivered)
    }

    /// Most recent terminally-failed deliveries for one subscriber.
    pub fn failed_messages(&self, subscriber_id: &str, limit: usize) -> Vec<FailedDelivery> {
        let failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        failed
            .iter()
            .rev()
            .filter(|f| f.subscriber_id == subscriber_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Operator-driven retry of a terminally-failed message. The attempt
    /// counter restarts; a manual retry is a fresh decision.
    pub async fn retry_failed(&self, message_id: &str) -> Result<DeliveryOutcome> {
        let entry = {
            let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
            let pos = failed
                .iter()
                .position(|f| f.message.message_id() == message_id)
                .ok_or_else(|| HeraldError::NotFound(message_id.to_string()))?;
            failed.remove(pos)
        };
        let Some(entry) = entry else {
            return Err(HeraldError::NotFound(message_id.to_string()));
        };

        let params = self.params();
        let outcome = self
            .attempt(entry.subscriber_id, entry.message, 0, &params)
            .await;
        self.stats.record_outcome(outcome.status, outcome.elapsed_micros);
        Ok(outcome)
    }

    /// Retry entries currently waiting for their due time.
    pub fn retry_backlog(&self) -> usize {
        self.retries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
