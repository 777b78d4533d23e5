//! herald: message-routing and delivery core for multiplayer game backends.
//!
//! Re-exports the routing primitives (`herald-core`) and the runtime
//! (`herald-engine`). Embedders typically construct a
//! [`herald_engine::Messaging`] from an [`herald_engine::EngineConfig`] and
//! map their transport endpoints onto its operations.

pub use herald_core as core;
pub use herald_engine as engine;

pub use herald_core::{Envelope, HeraldError, MessageFilter, MetaValue, Priority, Result, Route, TargetKind};
pub use herald_engine::{EngineConfig, Messaging, RouteResult, Subscription};
