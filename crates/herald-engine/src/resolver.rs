//! Route resolution: expand a route into the concrete recipient set, and
//! pick the cheapest correct strategy for callers that have not pre-decided.

use std::collections::HashSet;

use herald_core::error::Result;
use herald_core::route::{Route, TargetKind};

use crate::config::schema::ResolverSection;
use crate::membership::Membership;
use crate::registry::SubscriberRegistry;

/// Tunable thresholds of the broadcast/multicast heuristic. Optimal values
/// depend on transport fan-out cost, so they come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RouteThresholds {
    pub broadcast_ratio: f64,
    pub urgent_ratio: f64,
    pub reliable_ratio: f64,
}

impl Default for RouteThresholds {
    fn default() -> Self {
        Self {
            broadcast_ratio: 0.6,
            urgent_ratio: 0.4,
            reliable_ratio: 0.75,
        }
    }
}

impl From<&ResolverSection> for RouteThresholds {
    fn from(s: &ResolverSection) -> Self {
        Self {
            broadcast_ratio: s.broadcast_ratio,
            urgent_ratio: s.urgent_ratio,
            reliable_ratio: s.reliable_ratio,
        }
    }
}

fn dedup_keep_order(ids: impl IntoIterator<Item = String>, excluded: &HashSet<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !excluded.contains(id.as_str()))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Expand a route into concrete recipient ids.
///
/// Unicast/Multicast use the target list as-is; Broadcast walks every
/// online registration; the scoped broadcasts consult the membership index
/// so cost is proportional to the scope. Excluded ids never appear in the
/// result, whatever the expansion yields.
pub fn resolve(
    route: &Route,
    registry: &SubscriberRegistry,
    membership: &Membership,
) -> Result<Vec<String>> {
    route.validate()?;
    let excluded: HashSet<&str> = route.exclude.iter().map(String::as_str).collect();

    let recipients = match route.kind {
        TargetKind::Unicast | TargetKind::Multicast => {
            dedup_keep_order(route.targets.iter().cloned(), &excluded)
        }
        TargetKind::Broadcast => dedup_keep_order(registry.online_ids(), &excluded),
        TargetKind::Room | TargetKind::Area | TargetKind::RoleType => {
            let index = match route.kind {
                TargetKind::Room => &membership.rooms,
                TargetKind::Area => &membership.areas,
                _ => &membership.roles,
            };
            let members = route.targets.iter().flat_map(|t| index.members(t));
            let online = members.filter(|id| {
                registry.lookup(id).map(|r| r.is_online()).unwrap_or(false)
            });
            dedup_keep_order(online, &excluded)
        }
    };
    Ok(recipients)
}

/// Choose a route kind for a caller that knows only the target count.
///
/// Broadcast is O(registry) and cheap per recipient but gives up
/// per-recipient acknowledgment tracking; multicast is O(targets) with full
/// tracking. Urgency lowers the broadcast threshold, a reliability
/// requirement raises it (and wins when both flags are set).
pub fn select_route_kind(
    target_count: usize,
    total_connections: usize,
    urgent: bool,
    requires_reliability: bool,
    thresholds: &RouteThresholds,
) -> TargetKind {
    if target_count <= 1 {
        return TargetKind::Unicast;
    }
    if total_connections == 0 {
        return TargetKind::Multicast;
    }

    let ratio = target_count as f64 / total_connections as f64;
    let threshold = if requires_reliability {
        thresholds.reliable_ratio
    } else if urgent {
        thresholds.urgent_ratio
    } else {
        thresholds.broadcast_ratio
    };

    if ratio >= threshold {
        TargetKind::Broadcast
    } else {
        TargetKind::Multicast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_target_is_unicast() {
        let t = RouteThresholds::default();
        assert_eq!(select_route_kind(1, 1_000, false, false, &t), TargetKind::Unicast);
        assert_eq!(select_route_kind(0, 1_000, false, false, &t), TargetKind::Unicast);
    }

    #[test]
    fn default_threshold_splits_at_ratio() {
        let t = RouteThresholds::default();
        assert_eq!(select_route_kind(59, 100, false, false, &t), TargetKind::Multicast);
        assert_eq!(select_route_kind(60, 100, false, false, &t), TargetKind::Broadcast);
    }

    #[test]
    fn urgency_lowers_threshold() {
        let t = RouteThresholds::default();
        assert_eq!(select_route_kind(45, 100, false, false, &t), TargetKind::Multicast);
        assert_eq!(select_route_kind(45, 100, true, false, &t), TargetKind::Broadcast);
    }

    #[test]
    fn reliability_raises_threshold_and_wins_over_urgency() {
        let t = RouteThresholds::default();
        assert_eq!(select_route_kind(70, 100, false, true, &t), TargetKind::Multicast);
        assert_eq!(select_route_kind(75, 100, false, true, &t), TargetKind::Broadcast);
        assert_eq!(select_route_kind(70, 100, true, true, &t), TargetKind::Multicast);
    }

    #[test]
    fn empty_registry_prefers_multicast() {
        let t = RouteThresholds::default();
        assert_eq!(select_route_kind(5, 0, false, false, &t), TargetKind::Multicast);
    }
}
