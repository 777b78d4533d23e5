//! herald core: transport-agnostic routing primitives, wire codec, and
//! payload compression.
//!
//! This crate defines the envelope/route data model, the per-subscriber
//! message filter, the versioned binary wire schema, and the error surface
//! shared by the engine and any transport embedding it. It intentionally
//! carries no runtime dependencies so it can be reused in multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `HeraldError`/`Result` so routing
//! processes do not crash on malformed input or bad traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod compress;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod route;

/// Shared result type.
pub use error::{HeraldError, Result};

pub use envelope::{now_ms, Envelope};
pub use filter::{FilterVerdict, MessageFilter, MetaValue};
pub use route::{Priority, Route, TargetKind};
