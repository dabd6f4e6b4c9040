//! Picks a child group with spare capacity during registration.

use canopy_shared::constants::MAX_GROUP_MEMBERS;
use canopy_store::{ChannelMainNode, ClusterMainNode};

/// A group that can accept members up to a threshold.
pub trait GroupCapacity {
    fn group_id(&self) -> &str;
    fn member_count(&self) -> i64;
}

impl GroupCapacity for ClusterMainNode {
    fn group_id(&self) -> &str {
        &self.cluster_id
    }

    fn member_count(&self) -> i64 {
        self.member_count
    }
}

impl GroupCapacity for ChannelMainNode {
    fn group_id(&self) -> &str {
        &self.channel_id
    }

    fn member_count(&self) -> i64 {
        self.member_count
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Assignment<'a, G> {
    Assigned(&'a G),
    /// Every candidate under `parent_id` is full. The caller decides what to create.
    RequiresNewGroup { parent_id: String },
}

#[derive(Debug, Clone, Copy)]
pub struct CapacityAssigner {
    threshold: i64,
}

impl Default for CapacityAssigner {
    fn default() -> Self {
        Self::new(MAX_GROUP_MEMBERS)
    }
}

impl CapacityAssigner {
    pub fn new(threshold: i64) -> Self {
        Self { threshold }
    }

    /// First candidate (storage order) with `member_count` below the threshold.
    pub fn assign<'a, G: GroupCapacity>(&self, parent_id: &str, candidates: &'a [G]) -> Assignment<'a, G> {
        match candidates.iter().find(|g| g.member_count() < self.threshold) {
            Some(group) => {
                tracing::debug!(
                    parent_id,
                    group_id = group.group_id(),
                    member_count = group.member_count(),
                    "Group with capacity found"
                );
                Assignment::Assigned(group)
            }
            None => Assignment::RequiresNewGroup {
                parent_id: parent_id.to_string(),
            },
        }
    }
}
