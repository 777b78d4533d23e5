//! Per-subscriber message filter and tagged metadata values.
//!
//! Filter metadata is a small tagged-variant value type instead of an
//! open-ended map of opaque objects, so matching stays type-safe without
//! reflection.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Tagged metadata value: string / integer / float / bool / nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(HashMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// Verdict of evaluating a filter against one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Deliver,
    /// Dropped by policy. Not an error and never retried.
    Filtered(&'static str),
}

impl FilterVerdict {
    pub fn reason(self) -> Option<&'static str> {
        match self {
            FilterVerdict::Deliver => None,
            FilterVerdict::Filtered(r) => Some(r),
        }
    }
}

/// Subscriber-side delivery policy.
///
/// `rooms`/`areas`/`role` declare membership and feed the engine's
/// membership index; the remaining fields gate individual envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageFilter {
    /// Allowed message types; `None` allows all.
    #[serde(default)]
    pub allowed_types: Option<HashSet<String>>,
    /// If present, only these senders are allowed.
    #[serde(default)]
    pub allowed_senders: Option<HashSet<String>>,
    /// Senders never delivered, even when allow-listed.
    #[serde(default)]
    pub blocked_senders: HashSet<String>,
    /// Envelopes below this byte priority are dropped.
    #[serde(default)]
    pub min_priority: u8,
    /// Room membership of this subscriber.
    #[serde(default)]
    pub rooms: HashSet<String>,
    /// Area membership of this subscriber.
    #[serde(default)]
    pub areas: HashSet<String>,
    /// Role of this subscriber (e.g. "player", "spectator").
    #[serde(default)]
    pub role: Option<String>,
    /// Exact-equality constraints against envelope tags.
    #[serde(default)]
    pub tag_constraints: HashMap<String, String>,
    /// When set, `sys.*` messages skip every check above.
    #[serde(default)]
    pub system_bypass: bool,
}

impl MessageFilter {
    /// Accept everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn with_min_priority(mut self, min: u8) -> Self {
        self.min_priority = min;
        self
    }

    pub fn with_allowed_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.rooms.insert(room.into());
        self
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.areas.insert(area.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn blocking_sender(mut self, sender: impl Into<String>) -> Self {
        self.blocked_senders.insert(sender.into());
        self
    }

    /// Evaluate this filter against one envelope. Checks run cheapest-first;
    /// any mismatch yields `Filtered`, never an error.
    pub fn evaluate<T>(&self, env: &Envelope<T>) -> FilterVerdict {
        if self.system_bypass && env.is_system() {
            return FilterVerdict::Deliver;
        }

        if env.route.priority < self.min_priority {
            return FilterVerdict::Filtered("below minimum priority");
        }

        if let Some(types) = &self.allowed_types {
            if !types.contains(&env.msg_type) {
                return FilterVerdict::Filtered("type not allowed");
            }
        }

        if let Some(sender) = &env.sender {
            if self.blocked_senders.contains(sender) {
                return FilterVerdict::Filtered("sender blocked");
            }
            if let Some(allowed) = &self.allowed_senders {
                if !allowed.contains(sender) {
                    return FilterVerdict::Filtered("sender not allowed");
                }
            }
        } else if self.allowed_senders.is_some() {
            // Allow-list present but the envelope is anonymous.
            return FilterVerdict::Filtered("sender not allowed");
        }

        for (key, want) in &self.tag_constraints {
            match env.tags.get(key) {
                Some(have) if have == want => {}
                _ => return FilterVerdict::Filtered("tag constraint mismatch"),
            }
        }

        FilterVerdict::Deliver
    }
}
