//! Envelope: the addressed, versioned unit of transport.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::route::{Priority, Route};

/// Message-type prefix that marks system messages. System messages may
/// bypass subscriber filters (see `MessageFilter::system_bypass`).
pub const SYSTEM_TYPE_PREFIX: &str = "sys.";

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The addressed unit of transport: a payload plus routing metadata.
///
/// The id is globally unique and immutable once created. The payload is
/// immutable before delivery and taken (`take_payload`) at the handoff
/// boundary, after which it reads as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    id: String,
    pub msg_type: String,
    pub route: Route,
    payload: Option<T>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl<T> Envelope<T> {
    /// Construct a new envelope with a generated unique id.
    pub fn new(msg_type: impl Into<String>, route: Route, payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            msg_type: msg_type.into(),
            route,
            payload: Some(payload),
            created_at_ms: now_ms(),
            sender: None,
            tags: HashMap::new(),
        }
    }

    /// Construct with a caller-provided id (wire decode, replay).
    pub fn with_id(
        id: impl Into<String>,
        msg_type: impl Into<String>,
        route: Route,
        payload: Option<T>,
    ) -> Self {
        Self {
            id: id.into(),
            msg_type: msg_type.into(),
            route,
            payload,
            created_at_ms: now_ms(),
            sender: None,
            tags: HashMap::new(),
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Take the payload out at the delivery boundary.
    pub fn take_payload(&mut self) -> Option<T> {
        self.payload.take()
    }

    /// Replace the payload (compression preprocessor rewrites it in place).
    pub fn set_payload(&mut self, payload: T) {
        self.payload = Some(payload);
    }

    pub fn priority_class(&self) -> Priority {
        self.route.priority_class()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.route.is_expired(now_ms)
    }

    pub fn is_system(&self) -> bool {
        self.msg_type.starts_with(SYSTEM_TYPE_PREFIX)
    }

    /// Map the payload type, keeping all addressing intact.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            msg_type: self.msg_type,
            route: self.route,
            payload: self.payload.map(f),
            created_at_ms: self.created_at_ms,
            sender: self.sender,
            tags: self.tags,
        }
    }
}
