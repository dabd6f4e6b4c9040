use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CMD_REGISTER_TO_CHANNEL, CMD_REGISTER_TO_CLUSTER};

/// One level of the overlay hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupLevel {
    Domain,
    Cluster,
    Channel,
}

impl GroupLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Cluster => "cluster",
            Self::Channel => "channel",
        }
    }

    /// Registration step the coordinator should drive once this level confirmed us.
    pub fn next_step(&self) -> &'static str {
        match self {
            Self::Domain => CMD_REGISTER_TO_CLUSTER,
            Self::Cluster => CMD_REGISTER_TO_CHANNEL,
            Self::Channel => "complete",
        }
    }

    /// Fresh opaque identifier for a group at this level.
    pub fn generate_id(&self) -> String {
        format!("{}_{}", self.as_str(), Uuid::new_v4().simple())
    }
}

impl fmt::Display for GroupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(Self::Domain),
            "cluster" => Ok(Self::Cluster),
            "channel" => Ok(Self::Channel),
            other => Err(format!("invalid group level: {other}")),
        }
    }
}

/// Fresh node identifier for a client instance.
pub fn generate_node_id() -> String {
    format!("node_{}", Uuid::new_v4().simple())
}

/// Where this client stands in the registration handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Unregistered,
    AwaitingDomainConfirm,
    AwaitingClusterConfirm,
    AwaitingChannelConfirm,
    Registered,
}

impl RegistrationState {
    /// State reached after `level` confirmed this node.
    pub fn after_confirm(level: GroupLevel) -> Self {
        match level {
            GroupLevel::Domain => Self::AwaitingClusterConfirm,
            GroupLevel::Cluster => Self::AwaitingChannelConfirm,
            GroupLevel::Channel => Self::Registered,
        }
    }

    pub fn is_registered(&self) -> bool {
        *self == Self::Registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_round_trips_through_str() {
        for level in [GroupLevel::Domain, GroupLevel::Cluster, GroupLevel::Channel] {
            assert_eq!(level.as_str().parse::<GroupLevel>().unwrap(), level);
        }
        assert!("galaxy".parse::<GroupLevel>().is_err());
    }

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = GroupLevel::Cluster.generate_id();
        let b = GroupLevel::Cluster.generate_id();
        assert!(a.starts_with("cluster_"));
        assert_ne!(a, b);
        assert!(generate_node_id().starts_with("node_"));
    }

    #[test]
    fn test_handshake_progression() {
        assert_eq!(
            RegistrationState::after_confirm(GroupLevel::Domain),
            RegistrationState::AwaitingClusterConfirm
        );
        assert!(RegistrationState::after_confirm(GroupLevel::Channel).is_registered());
        assert_eq!(GroupLevel::Channel.next_step(), "complete");
    }
}
