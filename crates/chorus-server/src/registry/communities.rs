//! Community membership index: community <-> identity, both directions.

use std::collections::{BTreeSet, HashMap};

/// Bidirectional membership sets. The two maps are always mirror images,
/// and neither keeps an empty set around.
#[derive(Debug, Default)]
pub struct MembershipIndex {
    members: HashMap<String, BTreeSet<String>>,
    communities: HashMap<String, BTreeSet<String>>,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity_id` to `community_id`. Returns false if already a member.
    pub fn join(&mut self, identity_id: &str, community_id: &str) -> bool {
        let inserted = self
            .members
            .entry(community_id.to_string())
            .or_default()
            .insert(identity_id.to_string());
        if inserted {
            self.communities
                .entry(identity_id.to_string())
                .or_default()
                .insert(community_id.to_string());
        }
        inserted
    }

    /// Remove `identity_id` from `community_id`. Returns false if it was not
    /// a member.
    pub fn leave(&mut self, identity_id: &str, community_id: &str) -> bool {
        let removed = remove_from(&mut self.members, community_id, identity_id);
        if removed {
            remove_from(&mut self.communities, identity_id, community_id);
        }
        removed
    }

    /// Members of a community, sorted.
    pub fn members_of(&self, community_id: &str) -> Vec<String> {
        self.members
            .get(community_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Communities an identity belongs to, sorted.
    pub fn communities_of(&self, identity_id: &str) -> Vec<String> {
        self.communities
            .get(identity_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, identity_id: &str, community_id: &str) -> bool {
        self.members
            .get(community_id)
            .is_some_and(|set| set.contains(identity_id))
    }

    #[cfg(test)]
    fn is_mirrored(&self) -> bool {
        let forward = self
            .members
            .iter()
            .flat_map(|(c, ids)| ids.iter().map(move |i| (i.clone(), c.clone())));
        let backward_count: usize = self.communities.values().map(BTreeSet::len).sum();
        let mut count = 0;
        for (identity, community) in forward {
            count += 1;
            if !self
                .communities
                .get(&identity)
                .is_some_and(|set| set.contains(&community))
            {
                return false;
            }
        }
        count == backward_count
            && self.members.values().all(|s| !s.is_empty())
            && self.communities.values().all(|s| !s.is_empty())
    }
}

fn remove_from(map: &mut HashMap<String, BTreeSet<String>>, key: &str, value: &str) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let mut index = MembershipIndex::new();
        assert!(index.join("alice", "guild"));
        assert!(!index.join("alice", "guild"));
        assert_eq!(index.members_of("guild"), vec!["alice"]);
        assert!(index.is_mirrored());
    }

    #[test]
    fn leave_removes_both_directions() {
        let mut index = MembershipIndex::new();
        index.join("alice", "guild");
        index.join("bob", "guild");
        index.join("alice", "other");

        assert!(index.leave("alice", "guild"));
        assert_eq!(index.members_of("guild"), vec!["bob"]);
        assert_eq!(index.communities_of("alice"), vec!["other"]);
        assert!(index.is_mirrored());
    }

    #[test]
    fn empty_community_is_collected() {
        let mut index = MembershipIndex::new();
        index.join("alice", "guild");
        index.leave("alice", "guild");
        assert!(index.members_of("guild").is_empty());
        assert!(index.communities_of("alice").is_empty());
        assert!(index.members.is_empty());
        assert!(index.communities.is_empty());
    }

    #[test]
    fn leave_of_non_member_is_noop() {
        let mut index = MembershipIndex::new();
        index.join("alice", "guild");
        assert!(!index.leave("bob", "guild"));
        assert!(!index.leave("alice", "nowhere"));
        assert!(index.contains("alice", "guild"));
        assert!(index.is_mirrored());
    }

    #[test]
    fn mirror_holds_over_mixed_sequence() {
        let mut index = MembershipIndex::new();
        let ops = [
            ("a", "x", true),
            ("b", "x", true),
            ("a", "y", true),
            ("a", "x", false),
            ("c", "y", true),
            ("b", "x", false),
            ("c", "y", false),
            ("c", "z", true),
        ];
        for (identity, community, join) in ops {
            if join {
                index.join(identity, community);
            } else {
                index.leave(identity, community);
            }
            assert!(index.is_mirrored());
        }
        assert_eq!(index.communities_of("a"), vec!["y"]);
        assert!(index.members_of("x").is_empty());
    }
}
