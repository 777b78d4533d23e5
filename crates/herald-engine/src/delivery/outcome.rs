//! Per-attempt, per-route, and per-batch result types.

use std::collections::HashMap;

use serde::Serialize;

use herald_core::route::TargetKind;

/// Terminal state of one message-recipient attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Handed off to the recipient's transport.
    Delivered,
    /// Parked in the recipient's pending queue (paused subscriber).
    Queued,
    /// Dropped by the recipient's filter; a policy outcome, not an error.
    Filtered,
    /// Handed off, acknowledgment still outstanding.
    AwaitingAck,
    /// Delivery failed (see `reason`); may be retried by the sweep.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Filtered => "filtered",
            DeliveryStatus::AwaitingAck => "awaiting_ack",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Record of one delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub message_id: String,
    pub subscriber_id: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_micros: u64,
}

/// Receipt for a delivery that still awaits (or has received) an ack.
#[derive(Debug, Clone, Serialize)]
pub struct AckReceipt {
    pub message_id: String,
    pub subscriber_id: String,
    pub outstanding: bool,
}

/// Aggregated result of routing one envelope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteResult {
    pub success: bool,
    pub delivered: usize,
    pub queued: usize,
    pub filtered: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub acks: Vec<AckReceipt>,
}

impl RouteResult {
    /// Result returned for a fire-and-forget send: accepted, dispatched in
    /// the background, no per-recipient counts yet.
    pub fn dispatched() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn from_outcomes(outcomes: &[DeliveryOutcome], duration_ms: u64) -> Self {
        let mut result = RouteResult {
            duration_ms,
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                DeliveryStatus::Delivered => result.delivered += 1,
                DeliveryStatus::Queued => result.queued += 1,
                DeliveryStatus::Filtered => result.filtered += 1,
                DeliveryStatus::AwaitingAck => {
                    result.delivered += 1;
                    result.acks.push(AckReceipt {
                        message_id: outcome.message_id.clone(),
                        subscriber_id: outcome.subscriber_id.clone(),
                        outstanding: true,
                    });
                }
                DeliveryStatus::Failed => {
                    result.failed += 1;
                    let reason = outcome.reason.as_deref().unwrap_or("delivery failed");
                    result
                        .errors
                        .push(format!("{}: {reason}", outcome.subscriber_id));
                }
            }
        }
        result.success = result.failed == 0;
        result
    }
}

/// Per-route-kind rollup inside a batch result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteKindStats {
    pub count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

/// Aggregated result of a batch send.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRouteResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Messages abandoned by cancellation or fail-fast.
    pub aborted: usize,
    pub duration_ms: u64,
    pub per_kind: HashMap<String, RouteKindStats>,
    pub results: Vec<RouteResult>,
}

impl BatchRouteResult {
    pub(crate) fn record(&mut self, kind: TargetKind, result: RouteResult) {
        let entry = self.per_kind.entry(kind.as_str().to_string()).or_default();
        entry.count += 1;
        if result.success {
            entry.succeeded += 1;
            self.succeeded += 1;
        } else {
            entry.failed += 1;
            self.failed += 1;
        }
        // Running average; finalized rates computed here as we go.
        entry.avg_duration_ms += (result.duration_ms as f64 - entry.avg_duration_ms) / entry.count as f64;
        entry.success_rate = entry.succeeded as f64 / entry.count as f64;
        self.total += 1;
        self.results.push(result);
    }
}
