//! Membership index: room/area/role -> subscribers, and back.
//!
//! Broadcast variants scoped to a room, area, or role resolve against this
//! index, so their cost is proportional to the membership rather than to
//! the whole registry.

use std::collections::HashMap;

use dashmap::{DashMap, DashSet};

use herald_core::{MessageFilter, MetaValue};

/// One bidirectional scope index: scope key -> subscribers, subscriber -> keys.
#[derive(Default)]
pub struct ScopeIndex {
    forward: DashMap<String, DashSet<String>>,
    reverse: DashMap<String, DashSet<String>>,
}

impl ScopeIndex {
    pub fn join(&self, key: &str, subscriber_id: &str) {
        self.forward
            .entry(key.to_string())
            .or_insert_with(DashSet::new)
            .insert(subscriber_id.to_string());

        self.reverse
            .entry(subscriber_id.to_string())
            .or_insert_with(DashSet::new)
            .insert(key.to_string());
    }

    pub fn leave(&self, key: &str, subscriber_id: &str) {
        if let Some(set) = self.forward.get(key) {
            set.remove(subscriber_id);
            if set.is_empty() {
                drop(set);
                self.forward.remove(key);
            }
        }
        if let Some(set) = self.reverse.get(subscriber_id) {
            set.remove(key);
            if set.is_empty() {
                drop(set);
                self.reverse.remove(subscriber_id);
            }
        }
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        self.forward
            .get(key)
            .map(|set| set.iter().map(|m| m.key().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, key: &str) -> usize {
        self.forward.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every membership of one subscriber.
    pub fn cleanup(&self, subscriber_id: &str) {
        if let Some(keys) = self.reverse.remove(subscriber_id).map(|(_, v)| v) {
            for k in keys.iter() {
                let key = k.key();
                if let Some(set) = self.forward.get(key) {
                    set.remove(subscriber_id);
                    if set.is_empty() {
                        drop(set);
                        self.forward.remove(key);
                    }
                }
            }
        }
    }
}

/// Room, area, and role scopes of all subscribers.
#[derive(Default)]
pub struct Membership {
    pub rooms: ScopeIndex,
    pub areas: ScopeIndex,
    pub roles: ScopeIndex,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)index one subscriber from its filter and registration metadata.
    /// The role comes from the filter when declared, else from a "role"
    /// metadata entry.
    pub fn apply(
        &self,
        subscriber_id: &str,
        filter: &MessageFilter,
        metadata: &HashMap<String, MetaValue>,
    ) {
        self.remove(subscriber_id);
        for room in &filter.rooms {
            self.rooms.join(room, subscriber_id);
        }
        for area in &filter.areas {
            self.areas.join(area, subscriber_id);
        }
        let role = filter
            .role
            .as_deref()
            .or_else(|| metadata.get("role").and_then(MetaValue::as_str));
        if let Some(role) = role {
            self.roles.join(role, subscriber_id);
        }
    }

    pub fn remove(&self, subscriber_id: &str) {
        self.rooms.cleanup(subscriber_id);
        self.areas.cleanup(subscriber_id);
        self.roles.cleanup(subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_cleanup() {
        let idx = ScopeIndex::default();
        idx.join("lobby", "u1");
        idx.join("lobby", "u2");
        idx.join("dungeon", "u1");

        assert_eq!(idx.member_count("lobby"), 2);
        assert_eq!(idx.member_count("dungeon"), 1);

        idx.cleanup("u1");
        assert_eq!(idx.member_count("lobby"), 1);
        assert_eq!(idx.member_count("dungeon"), 0);
        assert!(idx.members("dungeon").is_empty());
    }

    #[test]
    fn apply_reindexes() {
        let m = Membership::new();
        let mut filter = MessageFilter::allow_all().with_room("lobby");
        m.apply("u1", &filter, &HashMap::new());
        assert_eq!(m.rooms.members("lobby"), vec!["u1".to_string()]);

        // Re-registering with a different room replaces the old membership.
        filter.rooms.clear();
        filter = filter.with_room("dungeon");
        m.apply("u1", &filter, &HashMap::new());
        assert!(m.rooms.members("lobby").is_empty());
        assert_eq!(m.rooms.members("dungeon"), vec!["u1".to_string()]);
    }

    #[test]
    fn role_from_metadata_fallback() {
        let m = Membership::new();
        let meta: HashMap<String, MetaValue> =
            [("role".to_string(), MetaValue::from("spectator"))].into_iter().collect();
        m.apply("u9", &MessageFilter::allow_all(), &meta);
        assert_eq!(m.roles.members("spectator"), vec!["u9".to_string()]);
    }
}
