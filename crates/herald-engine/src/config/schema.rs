use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use herald_core::error::{HeraldError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub queues: QueueSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub timeouts: TimeoutSection,

    #[serde(default)]
    pub sweeps: SweepSection,

    #[serde(default)]
    pub history: HistorySection,

    #[serde(default)]
    pub resolver: ResolverSection,

    #[serde(default)]
    pub compression: CompressionSection,

    #[serde(default)]
    pub stats: StatsSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            registry: RegistrySection::default(),
            queues: QueueSection::default(),
            retry: RetrySection::default(),
            timeouts: TimeoutSection::default(),
            sweeps: SweepSection::default(),
            history: HistorySection::default(),
            resolver: ResolverSection::default(),
            compression: CompressionSection::default(),
            stats: StatsSection::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HeraldError::UnsupportedVersion);
        }
        self.registry.validate()?;
        self.queues.validate()?;
        self.retry.validate()?;
        self.timeouts.validate()?;
        self.sweeps.validate()?;
        self.resolver.validate()?;
        self.compression.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    /// Fail registration with ALREADY_ACTIVE instead of upserting.
    #[serde(default)]
    pub strict_register: bool,

    /// Registrations idle longer than this are evicted by the cleanup
    /// sweep. 0 disables eviction.
    #[serde(default = "default_idle_eviction_ms")]
    pub idle_eviction_ms: u64,

    /// Capacity of each subscriber's outbox channel.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            strict_register: false,
            idle_eviction_ms: default_idle_eviction_ms(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl RegistrySection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65_536).contains(&self.outbox_capacity) {
            return Err(HeraldError::BadRequest(
                "registry.outbox_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_idle_eviction_ms() -> u64 {
    3_600_000
}
fn default_outbox_capacity() -> usize {
    256
}

/// Overflow behavior of a full pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Reject the incoming message.
    RejectNew,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSection {
    /// Upper bound of one subscriber's pending queue.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Per-priority-class sub-limits within the queue.
    #[serde(default = "default_critical_limit")]
    pub critical: usize,
    #[serde(default = "default_high_limit")]
    pub high: usize,
    #[serde(default = "default_normal_limit")]
    pub normal: usize,
    #[serde(default = "default_low_limit")]
    pub low: usize,

    #[serde(default = "default_overflow_policy")]
    pub overflow_policy: OverflowPolicy,

    /// How long a reliable handoff may wait on a full outbox.
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            critical: default_critical_limit(),
            high: default_high_limit(),
            normal: default_normal_limit(),
            low: default_low_limit(),
            overflow_policy: default_overflow_policy(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
        }
    }
}

impl QueueSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1_000_000).contains(&self.max_pending) {
            return Err(HeraldError::BadRequest(
                "queues.max_pending must be between 1 and 1000000".into(),
            ));
        }
        for (name, limit) in [
            ("critical", self.critical),
            ("high", self.high),
            ("normal", self.normal),
            ("low", self.low),
        ] {
            if limit == 0 || limit > self.max_pending {
                return Err(HeraldError::BadRequest(format!(
                    "queues.{name} must be between 1 and queues.max_pending"
                )));
            }
        }
        if !(1..=60_000).contains(&self.handoff_timeout_ms) {
            return Err(HeraldError::BadRequest(
                "queues.handoff_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_pending() -> usize {
    10_000
}
fn default_critical_limit() -> usize {
    4_000
}
fn default_high_limit() -> usize {
    3_000
}
fn default_normal_limit() -> usize {
    2_000
}
fn default_low_limit() -> usize {
    1_000
}
fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}
fn default_handoff_timeout_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before a retry; multiplied by the attempt count.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetrySection {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts > 100 {
            return Err(HeraldError::BadRequest(
                "retry.max_attempts must be at most 100".into(),
            ));
        }
        if !(1..=600_000).contains(&self.delay_ms) {
            return Err(HeraldError::BadRequest(
                "retry.delay_ms must be between 1 and 600000".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    /// Unacknowledged deliveries older than this are retried or failed.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Per-message-type overrides of `message_timeout_ms`.
    #[serde(default)]
    pub per_type: HashMap<String, u64>,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            message_timeout_ms: default_message_timeout_ms(),
            per_type: HashMap::new(),
        }
    }
}

impl TimeoutSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=3_600_000).contains(&self.message_timeout_ms) {
            return Err(HeraldError::BadRequest(
                "timeouts.message_timeout_ms must be between 10 and 3600000".into(),
            ));
        }
        for (msg_type, t) in &self.per_type {
            if !(10..=3_600_000).contains(t) {
                return Err(HeraldError::BadRequest(format!(
                    "timeouts.per_type.{msg_type} must be between 10 and 3600000"
                )));
            }
        }
        Ok(())
    }

    /// Effective timeout for a message type.
    pub fn for_type(&self, msg_type: &str) -> u64 {
        self.per_type
            .get(msg_type)
            .copied()
            .unwrap_or(self.message_timeout_ms)
    }
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSection {
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl SweepSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=600_000).contains(&self.retry_interval_ms) {
            return Err(HeraldError::BadRequest(
                "sweeps.retry_interval_ms must be between 10 and 600000".into(),
            ));
        }
        if !(100..=86_400_000).contains(&self.cleanup_interval_ms) {
            return Err(HeraldError::BadRequest(
                "sweeps.cleanup_interval_ms must be between 100 and 86400000".into(),
            ));
        }
        Ok(())
    }
}

fn default_retry_interval_ms() -> u64 {
    500
}
fn default_cleanup_interval_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistorySection {
    /// Retained-history ring size used for subscribe-time replay.
    #[serde(default = "default_history_size")]
    pub max_size: usize,

    /// Append accepted envelopes to the external message store.
    #[serde(default)]
    pub persistence_enabled: bool,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_size: default_history_size(),
            persistence_enabled: false,
        }
    }
}

fn default_history_size() -> usize {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverSection {
    /// target/total ratio at which broadcast wins over multicast.
    #[serde(default = "default_broadcast_ratio")]
    pub broadcast_ratio: f64,

    /// Lowered threshold for urgent messages.
    #[serde(default = "default_urgent_ratio")]
    pub urgent_ratio: f64,

    /// Raised threshold when per-recipient tracking is required.
    #[serde(default = "default_reliable_ratio")]
    pub reliable_ratio: f64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            broadcast_ratio: default_broadcast_ratio(),
            urgent_ratio: default_urgent_ratio(),
            reliable_ratio: default_reliable_ratio(),
        }
    }
}

impl ResolverSection {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("broadcast_ratio", self.broadcast_ratio),
            ("urgent_ratio", self.urgent_ratio),
            ("reliable_ratio", self.reliable_ratio),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(HeraldError::BadRequest(format!(
                    "resolver.{name} must be within (0, 1]"
                )));
            }
        }
        if self.urgent_ratio > self.broadcast_ratio || self.broadcast_ratio > self.reliable_ratio {
            return Err(HeraldError::BadRequest(
                "resolver thresholds must satisfy urgent_ratio <= broadcast_ratio <= reliable_ratio"
                    .into(),
            ));
        }
        Ok(())
    }
}

fn default_broadcast_ratio() -> f64 {
    0.6
}
fn default_urgent_ratio() -> f64 {
    0.4
}
fn default_reliable_ratio() -> f64 {
    0.75
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionSection {
    /// Payloads under this size are never compressed.
    #[serde(default = "default_compression_min_size")]
    pub min_size: usize,

    /// Accept compression only below this fraction of the original size.
    #[serde(default = "default_compression_max_ratio")]
    pub max_ratio: f64,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            min_size: default_compression_min_size(),
            max_ratio: default_compression_max_ratio(),
        }
    }
}

impl CompressionSection {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_ratio > 0.0 && self.max_ratio <= 1.0) {
            return Err(HeraldError::BadRequest(
                "compression.max_ratio must be within (0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> herald_core::compress::CompressionPolicy {
        herald_core::compress::CompressionPolicy {
            min_size: self.min_size,
            max_ratio: self.max_ratio,
        }
    }
}

fn default_compression_min_size() -> usize {
    1_024
}
fn default_compression_max_ratio() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsSection {
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,

    /// Failure percentage at which health degrades.
    #[serde(default = "default_unhealthy_failure_pct")]
    pub unhealthy_failure_pct: f64,

    /// Total pending backlog at which health degrades.
    #[serde(default = "default_unhealthy_backlog")]
    pub unhealthy_backlog: usize,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            enabled: default_stats_enabled(),
            unhealthy_failure_pct: default_unhealthy_failure_pct(),
            unhealthy_backlog: default_unhealthy_backlog(),
        }
    }
}

fn default_stats_enabled() -> bool {
    true
}
fn default_unhealthy_failure_pct() -> f64 {
    10.0
}
fn default_unhealthy_backlog() -> usize {
    50_000
}
