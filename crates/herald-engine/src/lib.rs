//! herald engine: the message-routing and delivery runtime.
//!
//! This crate wires the subscriber registry, membership index, route
//! resolver, delivery engine, acknowledgment tracker, statistics monitor,
//! and background sweeps into a cohesive routing stack. It is intended to
//! be embedded by a wire transport (RPC/WebSocket endpoints) and by
//! integration tests; the transport itself lives outside this crate.

pub mod ack;
pub mod config;
pub mod delivery;
pub mod history;
pub mod membership;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod stats;

pub use ack::{AckOutcome, AckTracker};
pub use config::EngineConfig;
pub use delivery::{
    BatchOptions, BatchRouteResult, DeliveryEngine, DeliveryOutcome, DeliveryStatus,
    FailedDelivery, OutboundMessage, RouteResult,
};
pub use history::{History, MemoryStore, MessageStore};
pub use membership::Membership;
pub use registry::{Registration, SubscriberRegistry};
pub use resolver::{resolve, select_route_kind, RouteThresholds};
pub use service::{Messaging, SubscriberInfo, Subscription};
pub use stats::{EngineStats, HealthStatus, StatsSnapshot};
