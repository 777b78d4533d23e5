//! Route: the addressing specification carried by every envelope.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{HeraldError, Result};

/// Default byte priority (middle of the range).
pub const DEFAULT_PRIORITY: u8 = 128;

/// Default hop limit guarding against routing loops.
pub const DEFAULT_HOP_LIMIT: u8 = 8;

/// Addressing mode of a route.
///
/// Unicast/Multicast carry user ids in `targets`; the broadcast variants
/// carry room/area/role ids instead and expand against the membership index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Unicast,
    Multicast,
    Broadcast,
    Room,
    Area,
    RoleType,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Unicast => "unicast",
            TargetKind::Multicast => "multicast",
            TargetKind::Broadcast => "broadcast",
            TargetKind::Room => "room",
            TargetKind::Area => "area",
            TargetKind::RoleType => "role_type",
        }
    }

    /// Stable wire tag. Values are part of the schema and never reused.
    pub fn wire_tag(self) -> u8 {
        match self {
            TargetKind::Unicast => 0,
            TargetKind::Multicast => 1,
            TargetKind::Broadcast => 2,
            TargetKind::Room => 3,
            TargetKind::Area => 4,
            TargetKind::RoleType => 5,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(TargetKind::Unicast),
            1 => Ok(TargetKind::Multicast),
            2 => Ok(TargetKind::Broadcast),
            3 => Ok(TargetKind::Room),
            4 => Ok(TargetKind::Area),
            5 => Ok(TargetKind::RoleType),
            other => Err(HeraldError::Decode(format!("unknown target kind: {other}"))),
        }
    }
}

/// Priority class derived from the byte priority. Queue sub-limits and
/// compression effort are keyed by class, not by raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0..=63 => Priority::Low,
            64..=159 => Priority::Normal,
            160..=223 => Priority::High,
            224..=255 => Priority::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Addressing specification: target kind + ids, excludes, priority, expiry,
/// ack requirement, and a hop counter guarding against re-route loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub kind: TargetKind,
    /// Target ids; semantics depend on `kind`.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Subscriber ids never delivered to, whatever the expansion yields.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub expires_at_ms: Option<u64>,
    #[serde(default)]
    pub require_ack: bool,
    #[serde(default)]
    pub hop: u8,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}
fn default_hop_limit() -> u8 {
    DEFAULT_HOP_LIMIT
}

impl Route {
    fn new(kind: TargetKind, targets: Vec<String>) -> Self {
        Self {
            kind,
            targets,
            exclude: Vec::new(),
            priority: DEFAULT_PRIORITY,
            expires_at_ms: None,
            require_ack: false,
            hop: 0,
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }

    pub fn unicast(target: impl Into<String>) -> Self {
        Self::new(TargetKind::Unicast, vec![target.into()])
    }

    pub fn multicast(targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(
            TargetKind::Multicast,
            targets.into_iter().map(Into::into).collect(),
        )
    }

    pub fn broadcast() -> Self {
        Self::new(TargetKind::Broadcast, Vec::new())
    }

    pub fn room(room_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Room, vec![room_id.into()])
    }

    pub fn area(area_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Area, vec![area_id.into()])
    }

    pub fn role_type(role: impl Into<String>) -> Self {
        Self::new(TargetKind::RoleType, vec![role.into()])
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry_ms(mut self, expires_at_ms: u64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    pub fn with_ack(mut self) -> Self {
        self.require_ack = true;
        self
    }

    pub fn priority_class(&self) -> Priority {
        Priority::from_byte(self.priority)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(t) if t <= now_ms)
    }

    /// Number of distinct target ids.
    pub fn distinct_targets(&self) -> usize {
        self.targets.iter().collect::<HashSet<_>>().len()
    }

    /// Validate route shape. Called before any delivery attempt; a failure
    /// here is surfaced synchronously and nothing is dispatched.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TargetKind::Broadcast => {}
            TargetKind::Multicast => {
                if self.distinct_targets() < 2 {
                    return Err(HeraldError::InvalidRoute(
                        "multicast requires at least 2 distinct targets".into(),
                    ));
                }
            }
            _ => {
                if self.targets.is_empty() {
                    return Err(HeraldError::InvalidRoute(format!(
                        "{} route requires at least one target",
                        self.kind.as_str()
                    )));
                }
            }
        }
        if self.hop > self.hop_limit {
            return Err(HeraldError::InvalidRoute(format!(
                "hop count {} exceeds limit {}",
                self.hop, self.hop_limit
            )));
        }
        Ok(())
    }

    /// Bump the hop counter on a re-route. Fails once the limit is reached.
    pub fn next_hop(&mut self) -> Result<()> {
        if self.hop >= self.hop_limit {
            return Err(HeraldError::InvalidRoute(format!(
                "hop limit {} exhausted",
                self.hop_limit
            )));
        }
        self.hop += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_needs_two_distinct_targets() {
        let r = Route::multicast(["a"]);
        assert!(matches!(r.validate(), Err(HeraldError::InvalidRoute(_))));

        let r = Route::multicast(["a", "a"]);
        assert!(r.validate().is_err());

        let r = Route::multicast(["a", "b"]);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn unicast_needs_a_target() {
        let mut r = Route::broadcast();
        r.kind = TargetKind::Unicast;
        assert!(r.validate().is_err());
        assert!(Route::unicast("u1").validate().is_ok());
    }

    #[test]
    fn broadcast_needs_no_targets() {
        assert!(Route::broadcast().validate().is_ok());
    }

    #[test]
    fn hop_limit_is_enforced() {
        let mut r = Route::unicast("u1");
        r.hop_limit = 2;
        assert!(r.next_hop().is_ok());
        assert!(r.next_hop().is_ok());
        assert!(r.next_hop().is_err());
        assert_eq!(r.hop, 2);
    }

    #[test]
    fn priority_classes() {
        assert_eq!(Priority::from_byte(0), Priority::Low);
        assert_eq!(Priority::from_byte(63), Priority::Low);
        assert_eq!(Priority::from_byte(64), Priority::Normal);
        assert_eq!(Priority::from_byte(DEFAULT_PRIORITY), Priority::Normal);
        assert_eq!(Priority::from_byte(160), Priority::High);
        assert_eq!(Priority::from_byte(224), Priority::Critical);
        assert_eq!(Priority::from_byte(255), Priority::Critical);
    }

    #[test]
    fn expiry_check() {
        let r = Route::unicast("u1").with_expiry_ms(1_000);
        assert!(!r.is_expired(999));
        assert!(r.is_expired(1_000));
        assert!(r.is_expired(2_000));
        assert!(!Route::unicast("u1").is_expired(u64::MAX));
    }
}
