//! The inbound service surface consumed by a wire transport.
//!
//! `Messaging` wires configuration, registry, membership, resolver,
//! delivery engine, acknowledgment tracker, statistics, and history into
//! one embeddable unit. A transport holds it in an `Arc` and maps its RPC
//! endpoints onto these operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use herald_core::error::{HeraldError, Result};
use herald_core::{Envelope, MessageFilter, MetaValue};

use crate::ack::{AckOutcome, AckTracker};
use crate::config::EngineConfig;
use crate::delivery::sweep::spawn_sweeps;
use crate::delivery::{
    BatchOptions, BatchRouteResult, DeliveryEngine, FailedDelivery, OutboundMessage, RouteResult,
};
use crate::history::{History, MessageStore};
use crate::membership::Membership;
use crate::registry::SubscriberRegistry;
use crate::resolver::RouteThresholds;
use crate::stats::{EngineStats, HealthStatus, StatsSnapshot};

/// Live subscription handle: the id to unsubscribe with and the receiving
/// half of the subscriber's outbox.
pub struct Subscription {
    pub subscription_id: String,
    pub receiver: mpsc::Receiver<OutboundMessage>,
}

/// Operator-facing view of one registration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriberInfo {
    pub subscriber_id: String,
    pub subscription_id: String,
    pub online: bool,
    pub paused: bool,
    pub pending: usize,
    pub delivered: u64,
    pub failed: u64,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

/// The routing service.
pub struct Messaging {
    config: Arc<RwLock<EngineConfig>>,
    registry: Arc<SubscriberRegistry>,
    membership: Arc<Membership>,
    ack: Arc<AckTracker>,
    stats: Arc<EngineStats>,
    history: Arc<History>,
    engine: Arc<DeliveryEngine>,
    store: Option<Arc<dyn MessageStore>>,
    shutdown: CancellationToken,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
}

impl Messaging {
    /// Build the service. Fails on invalid configuration; nothing is
    /// spawned until `spawn_sweeps`.
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;

        let registry = Arc::new(SubscriberRegistry::new(cfg.registry.strict_register));
        let membership = Arc::new(Membership::new());
        let ack = Arc::new(AckTracker::new());
        let stats = Arc::new(EngineStats::new(cfg.stats.enabled));
        let history = Arc::new(History::new(cfg.history.max_size));
        let config = Arc::new(RwLock::new(cfg));

        let engine = Arc::new(DeliveryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
            Arc::clone(&ack),
            Arc::clone(&stats),
            Arc::clone(&history),
            Arc::clone(&config),
        ));

        Ok(Self {
            config,
            registry,
            membership,
            ack,
            stats,
            history,
            engine,
            store: None,
            shutdown: CancellationToken::new(),
            sweeps: Mutex::new(Vec::new()),
        })
    }

    /// Attach the external message store used when persistence is enabled.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start the retry and cleanup loops.
    pub fn spawn_sweeps(&self) {
        let cfg = self.config_snapshot();
        let handles = spawn_sweeps(
            Arc::clone(&self.engine),
            cfg.sweeps.retry_interval_ms,
            cfg.sweeps.cleanup_interval_ms,
            self.shutdown.child_token(),
        );
        let mut sweeps = self.sweeps.lock().unwrap_or_else(|e| e.into_inner());
        sweeps.extend(handles);
    }

    /// Stop background loops and cancel in-flight batches.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut sweeps = self.sweeps.lock().unwrap_or_else(|e| e.into_inner());
            sweeps.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("messaging service stopped");
    }

    fn config_snapshot(&self) -> EngineConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register (or replace) a subscriber. Optionally replays retained
    /// history matching the filter into the fresh outbox.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        filter: MessageFilter,
        metadata: HashMap<String, MetaValue>,
        replay_history: bool,
        history_limit: usize,
    ) -> Result<Subscription> {
        let cfg = self.config_snapshot();
        let (reg, receiver) = self.registry.register(
            subscriber_id,
            filter,
            metadata,
            cfg.registry.outbox_capacity,
        )?;
        self.membership
            .apply(subscriber_id, reg.filter(), reg.metadata());

        if replay_history {
            let limit = history_limit.min(cfg.history.max_size);
            for message in self.history.replay_for(reg.filter(), limit) {
                // Replay is best-effort; a full outbox simply truncates it.
                if reg.outbox().try_send(message).is_err() {
                    break;
                }
            }
        }

        tracing::info!(subscriber = %subscriber_id, "subscribed");
        Ok(Subscription {
            subscription_id: reg.subscription_id().to_string(),
            receiver,
        })
    }

    /// Remove a registration and drop its pending queue. Reports not-found
    /// when already absent or when the subscription id is stale.
    pub fn unsubscribe(&self, subscriber_id: &str, subscription_id: &str) -> Result<()> {
        self.registry.unregister(subscriber_id, subscription_id)?;
        self.membership.remove(subscriber_id);
        tracing::info!(subscriber = %subscriber_id, "unsubscribed");
        Ok(())
    }

    /// Route one envelope. With `wait_for_delivery` the call returns the
    /// full per-recipient result (bounded by `timeout_ms`); without it the
    /// envelope is dispatched in the background and an accepted-only result
    /// is returned.
    pub async fn send_message(
        &self,
        envelope: Envelope<Bytes>,
        wait_for_delivery: bool,
        timeout_ms: Option<u64>,
    ) -> Result<RouteResult> {
        self.persist(&envelope).await;

        if !wait_for_delivery {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if let Err(e) = engine.deliver(envelope).await {
                    tracing::warn!(error = %e, "background delivery failed");
                }
            });
            return Ok(RouteResult::dispatched());
        }

        let wait = timeout_ms.unwrap_or_else(|| self.config_snapshot().timeouts.message_timeout_ms);
        match timeout(Duration::from_millis(wait), self.engine.deliver(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(HeraldError::DeliveryFailed(format!(
                "delivery did not complete within {wait}ms"
            ))),
        }
    }

    /// Route a batch. `wait_for_all` mirrors `send_message`'s waiting
    /// behavior for the whole batch.
    pub async fn send_batch(
        &self,
        envelopes: Vec<Envelope<Bytes>>,
        wait_for_all: bool,
        timeout_ms: Option<u64>,
        fail_fast: bool,
    ) -> Result<BatchRouteResult> {
        for envelope in &envelopes {
            self.persist(envelope).await;
        }

        let opts = BatchOptions {
            fail_fast,
            cancel: self.shutdown.child_token(),
        };

        if !wait_for_all {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                engine.deliver_batch(envelopes, opts).await;
            });
            return Ok(BatchRouteResult::default());
        }

        let wait = timeout_ms.unwrap_or_else(|| self.config_snapshot().timeouts.message_timeout_ms);
        match timeout(
            Duration::from_millis(wait),
            self.engine.deliver_batch(envelopes, opts),
        )
        .await
        {
            Ok(batch) => Ok(batch),
            Err(_) => Err(HeraldError::DeliveryFailed(format!(
                "batch did not complete within {wait}ms"
            ))),
        }
    }

    /// Settle an outstanding delivery. Unmatched acks are accepted and
    /// ignored, so double-acking is harmless.
    pub fn acknowledge(
        &self,
        message_id: &str,
        subscriber_id: &str,
        processed: bool,
        result: Option<&str>,
    ) -> AckOutcome {
        let outcome = self.ack.acknowledge(message_id, subscriber_id, processed, result);
        match outcome {
            AckOutcome::Processed => self.stats.record_ack(),
            AckOutcome::Rejected => {
                // Delivered but rejected by the recipient; surfaced through
                // stats, not retried.
                tracing::debug!(%message_id, %subscriber_id, "delivery rejected by recipient");
            }
            AckOutcome::Unmatched => {}
        }
        outcome
    }

    pub fn pause_delivery(&self, subscriber_id: &str) -> Result<()> {
        self.registry.pause(subscriber_id)?;
        tracing::debug!(subscriber = %subscriber_id, "delivery paused");
        Ok(())
    }

    /// Resume delivery and drain the pending queue into the outbox.
    pub fn resume_delivery(&self, subscriber_id: &str) -> Result<usize> {
        self.registry.resume(subscriber_id)?;
        let drained = self.engine.drain_pending(subscriber_id)?;
        tracing::debug!(subscriber = %subscriber_id, drained, "delivery resumed");
        Ok(drained)
    }

    pub fn clear_queue(&self, subscriber_id: &str) -> Result<usize> {
        self.engine.clear_queue(subscriber_id)
    }

    pub fn pending_count(&self, subscriber_id: &str) -> Result<usize> {
        self.engine.pending_count(subscriber_id)
    }

    pub fn failed_messages(&self, subscriber_id: &str, limit: usize) -> Vec<FailedDelivery> {
        self.engine.failed_messages(subscriber_id, limit)
    }

    pub async fn retry_failed_message(&self, message_id: &str) -> Result<crate::delivery::DeliveryOutcome> {
        self.engine.retry_failed(message_id).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.registry.active_count(None),
            self.registry.pending_backlog() + self.engine.retry_backlog(),
            self.ack.pending_count(),
        )
    }

    pub fn health(&self) -> HealthStatus {
        let cfg = self.config_snapshot();
        self.stats.health(
            &cfg.stats,
            self.registry.active_count(None),
            self.registry.pending_backlog() + self.engine.retry_backlog(),
            self.ack.pending_count(),
        )
    }

    pub fn active_subscribers(&self) -> Vec<SubscriberInfo> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|reg| SubscriberInfo {
                subscriber_id: reg.subscriber_id().to_string(),
                subscription_id: reg.subscription_id().to_string(),
                online: reg.is_online(),
                paused: reg.is_paused(),
                pending: reg.pending_count(),
                delivered: reg.delivered_count(),
                failed: reg.failed_count(),
                created_at_ms: reg.created_at_ms(),
                last_activity_ms: reg.last_activity_ms(),
            })
            .collect()
    }

    pub fn subscriber_info(&self, subscriber_id: &str) -> Result<SubscriberInfo> {
        let reg = self
            .registry
            .lookup(subscriber_id)
            .ok_or_else(|| HeraldError::NotFound(subscriber_id.to_string()))?;
        Ok(SubscriberInfo {
            subscriber_id: reg.subscriber_id().to_string(),
            subscription_id: reg.subscription_id().to_string(),
            online: reg.is_online(),
            paused: reg.is_paused(),
            pending: reg.pending_count(),
            delivered: reg.delivered_count(),
            failed: reg.failed_count(),
            created_at_ms: reg.created_at_ms(),
            last_activity_ms: reg.last_activity_ms(),
        })
    }

    /// Swap runtime configuration. Validation failures leave the previous
    /// configuration untouched.
    pub fn set_config(&self, cfg: EngineConfig) -> Result<()> {
        cfg.validate()?;
        self.stats.set_enabled(cfg.stats.enabled);
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = cfg;
        tracing::info!("configuration updated");
        Ok(())
    }

    pub fn config(&self) -> EngineConfig {
        self.config_snapshot()
    }

    /// Direct access to the delivery engine, for embedders that drive the
    /// sweeps themselves instead of `spawn_sweeps`.
    pub fn engine(&self) -> Arc<DeliveryEngine> {
        Arc::clone(&self.engine)
    }

    /// Thresholds for `select_route_kind` callers.
    pub fn route_thresholds(&self) -> RouteThresholds {
        RouteThresholds::from(&self.config_snapshot().resolver)
    }

    async fn persist(&self, envelope: &Envelope<Bytes>) {
        if !self.config_snapshot().history.persistence_enabled {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.append(envelope).await {
                // Persistence is best-effort; routing continues.
                tracing::warn!(message_id = %envelope.id(), error = %e, "persist failed");
            }
        }
    }
}
