//! Running statistics and the advisory health signal.
//!
//! Counters are plain atomics updated on the delivery path; labeled counts
//! (by message type, by priority class) live in `DashMap`-backed vectors.
//! The rolling message rate uses a ring of per-second buckets so no lock is
//! taken to record. A Prometheus text rendering is provided for operators;
//! `snapshot()` is the structured API surface.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use herald_core::now_ms;
use herald_core::route::Priority;

use crate::config::schema::StatsSection;
use crate::delivery::DeliveryStatus;

/// Counter family with one dynamic label.
#[derive(Default)]
pub struct CounterVec {
    map: DashMap<String, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, label: &str) {
        if let Some(c) = self.map.get(label) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.map
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, label: &str) -> u64 {
        self.map.get(label).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.map
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, name: &str, label: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for e in self.map.iter() {
            let _ = writeln!(
                out,
                "{name}{{{label}=\"{}\"}} {}",
                e.key(),
                e.value().load(Ordering::Relaxed)
            );
        }
    }
}

const RATE_WINDOW_SECS: usize = 10;

/// Ring of per-second buckets for the rolling messages/sec rate.
struct RateWindow {
    stamps: [AtomicU64; RATE_WINDOW_SECS],
    counts: [AtomicU64; RATE_WINDOW_SECS],
}

impl Default for RateWindow {
    fn default() -> Self {
        Self {
            stamps: Default::default(),
            counts: Default::default(),
        }
    }
}

impl RateWindow {
    fn record(&self, now_ms: u64) {
        let sec = now_ms / 1_000;
        let slot = (sec as usize) % RATE_WINDOW_SECS;
        // A stale slot belongs to an older second: reclaim it.
        if self.stamps[slot].swap(sec, Ordering::Relaxed) != sec {
            self.counts[slot].store(0, Ordering::Relaxed);
        }
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    fn per_sec(&self, now_ms: u64) -> f64 {
        let sec = now_ms / 1_000;
        let mut total = 0u64;
        for slot in 0..RATE_WINDOW_SECS {
            let stamp = self.stamps[slot].load(Ordering::Relaxed);
            if sec.saturating_sub(stamp) < RATE_WINDOW_SECS as u64 {
                total += self.counts[slot].load(Ordering::Relaxed);
            }
        }
        total as f64 / RATE_WINDOW_SECS as f64
    }
}

/// Structured metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_sent: u64,
    pub delivered: u64,
    pub queued: u64,
    pub filtered: u64,
    pub failed: u64,
    pub retried: u64,
    pub acknowledged: u64,
    pub active_subscribers: usize,
    pub pending_messages: usize,
    pub acks_outstanding: usize,
    pub avg_delivery_latency_ms: f64,
    pub messages_per_sec: f64,
    pub failure_rate_pct: f64,
    pub by_type: HashMap<String, u64>,
    pub by_priority: HashMap<String, u64>,
}

/// Advisory health signal. Nothing in the engine throttles on this; it is
/// surfaced to operators and the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: String,
    pub issues: Vec<String>,
    pub snapshot: StatsSnapshot,
}

#[derive(Default)]
pub struct EngineStats {
    enabled: AtomicBool,
    sent: AtomicU64,
    delivered: AtomicU64,
    queued: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    acknowledged: AtomicU64,
    by_type: CounterVec,
    by_priority: CounterVec,
    latency_sum_micros: AtomicU64,
    latency_count: AtomicU64,
    rate: RateWindow,
}

impl EngineStats {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn on(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an accepted envelope entering the routing pipeline.
    pub fn record_send(&self, msg_type: &str, priority: Priority) {
        if !self.on() {
            return;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.by_type.inc(msg_type);
        self.by_priority.inc(priority.as_str());
        self.rate.record(now_ms());
    }

    /// Record one per-recipient outcome.
    pub fn record_outcome(&self, status: DeliveryStatus, elapsed_micros: u64) {
        if !self.on() {
            return;
        }
        match status {
            DeliveryStatus::Delivered | DeliveryStatus::AwaitingAck => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.latency_sum_micros.fetch_add(elapsed_micros, Ordering::Relaxed);
                self.latency_count.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Queued => {
                self.queued.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Filtered => {
                self.filtered.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_retry(&self) {
        if self.on() {
            self.retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ack(&self) {
        if self.on() {
            self.acknowledged.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(
        &self,
        active_subscribers: usize,
        pending_messages: usize,
        acks_outstanding: usize,
    ) -> StatsSnapshot {
        let sent = self.sent.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let avg_latency_ms = if latency_count == 0 {
            0.0
        } else {
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / latency_count as f64 / 1_000.0
        };
        let failure_rate_pct = if sent == 0 {
            0.0
        } else {
            failed as f64 / sent as f64 * 100.0
        };

        StatsSnapshot {
            total_sent: sent,
            delivered: self.delivered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed,
            retried: self.retried.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            active_subscribers,
            pending_messages,
            acks_outstanding,
            avg_delivery_latency_ms: avg_latency_ms,
            messages_per_sec: self.rate.per_sec(now_ms()),
            failure_rate_pct,
            by_type: self.by_type.snapshot(),
            by_priority: self.by_priority.snapshot(),
        }
    }

    /// Evaluate health against configured thresholds. Advisory only.
    pub fn health(
        &self,
        section: &StatsSection,
        active_subscribers: usize,
        pending_messages: usize,
        acks_outstanding: usize,
    ) -> HealthStatus {
        let snapshot = self.snapshot(active_subscribers, pending_messages, acks_outstanding);
        let mut issues = Vec::new();

        if snapshot.total_sent >= 10 && snapshot.failure_rate_pct >= section.unhealthy_failure_pct {
            issues.push(format!(
                "failure rate elevated: {:.1}% >= {:.1}%",
                snapshot.failure_rate_pct, section.unhealthy_failure_pct
            ));
        }
        if snapshot.pending_messages >= section.unhealthy_backlog {
            issues.push(format!(
                "queue backlog exceeds threshold: {} >= {}",
                snapshot.pending_messages, section.unhealthy_backlog
            ));
        }

        let healthy = issues.is_empty();
        HealthStatus {
            healthy,
            status: if healthy { "ok".into() } else { "degraded".into() },
            issues,
            snapshot,
        }
    }

    /// Render all counters in Prometheus text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("herald_sent_total", &self.sent),
            ("herald_delivered_total", &self.delivered),
            ("herald_queued_total", &self.queued),
            ("herald_filtered_total", &self.filtered),
            ("herald_failed_total", &self.failed),
            ("herald_retried_total", &self.retried),
            ("herald_acknowledged_total", &self.acknowledged),
        ] {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", value.load(Ordering::Relaxed));
        }
        self.by_type.render("herald_messages_by_type_total", "type", &mut out);
        self.by_priority
            .render("herald_messages_by_priority_total", "priority", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_the_right_counter() {
        let s = EngineStats::new(true);
        s.record_send("chat.msg", Priority::Normal);
        s.record_outcome(DeliveryStatus::Delivered, 1_500);
        s.record_outcome(DeliveryStatus::Filtered, 10);
        s.record_outcome(DeliveryStatus::Failed, 10);
        s.record_outcome(DeliveryStatus::AwaitingAck, 500);

        let snap = s.snapshot(2, 0, 1);
        assert_eq!(snap.total_sent, 1);
        assert_eq!(snap.delivered, 2);
        assert_eq!(snap.filtered, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.by_type.get("chat.msg"), Some(&1));
        assert_eq!(snap.by_priority.get("normal"), Some(&1));
        assert!(snap.avg_delivery_latency_ms > 0.0);
    }

    #[test]
    fn disabled_stats_record_nothing() {
        let s = EngineStats::new(false);
        s.record_send("chat.msg", Priority::Normal);
        s.record_outcome(DeliveryStatus::Delivered, 1_000);
        let snap = s.snapshot(0, 0, 0);
        assert_eq!(snap.total_sent, 0);
        assert_eq!(snap.delivered, 0);
    }

    #[test]
    fn health_flags_failure_rate() {
        let s = EngineStats::new(true);
        let section = StatsSection::default();
        for _ in 0..10 {
            s.record_send("t", Priority::Normal);
        }
        for _ in 0..5 {
            s.record_outcome(DeliveryStatus::Failed, 10);
        }
        let health = s.health(&section, 1, 0, 0);
        assert!(!health.healthy);
        assert_eq!(health.status, "degraded");
        assert!(health.issues.iter().any(|i| i.contains("failure rate")));
    }

    #[test]
    fn health_flags_backlog() {
        let s = EngineStats::new(true);
        let section = StatsSection::default();
        let health = s.health(&section, 1, section.unhealthy_backlog, 0);
        assert!(!health.healthy);
        assert!(health.issues.iter().any(|i| i.contains("backlog")));
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let s = EngineStats::new(true);
        s.record_send("chat.msg", Priority::Normal);
        let json = serde_json::to_string(&s.snapshot(1, 0, 0)).unwrap();
        assert!(json.contains("\"total_sent\":1"));
        assert!(json.contains("\"by_type\""));
    }

    #[test]
    fn render_contains_counters() {
        let s = EngineStats::new(true);
        s.record_send("chat.msg", Priority::High);
        let text = s.render();
        assert!(text.contains("herald_sent_total 1"));
        assert!(text.contains("herald_messages_by_type_total{type=\"chat.msg\"} 1"));
    }
}
