//! Delivery engine: per-recipient attempts, pending queues, retries.

pub mod engine;
pub mod outcome;
pub mod queue;
pub mod sweep;

use std::sync::Arc;

use bytes::Bytes;

use herald_core::codec::encode_envelope;
use herald_core::compress::Algorithm;
use herald_core::route::Priority;
use herald_core::Envelope;

pub use engine::{BatchOptions, DeliveryEngine, FailedDelivery};
pub use outcome::{
    AckReceipt, BatchRouteResult, DeliveryOutcome, DeliveryStatus, RouteKindStats, RouteResult,
};
pub use queue::{PendingQueue, QueueLimits, QueuedMessage};

/// Prepared outgoing message: payload preprocessed once, then shared across
/// the whole fan-out (clone is an `Arc` bump).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub envelope: Arc<Envelope<Bytes>>,
    pub algorithm: Algorithm,
}

impl OutboundMessage {
    pub fn message_id(&self) -> &str {
        self.envelope.id()
    }

    pub fn msg_type(&self) -> &str {
        &self.envelope.msg_type
    }

    pub fn priority_class(&self) -> Priority {
        self.envelope.priority_class()
    }

    /// Encode to the wire frame handed to a transport.
    pub fn to_wire(&self) -> Bytes {
        encode_envelope(&self.envelope, self.algorithm)
    }
}
