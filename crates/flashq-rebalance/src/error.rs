//! Error taxonomy for the rebalancing planner.

use std::fmt;

use crate::topology::PartitionKey;

/// All failure modes the planner can raise.
///
/// Every variant is returned rather than panicked; the planner never
/// partially mutates a topology and then returns an error (the one
/// documented exception is [`BalancerError::BrokerDecommission`], which is
/// raised after some moves have already landed).
#[derive(Debug, Clone, PartialEq)]
pub enum BalancerError {
    /// A caller referenced a broker id not present in the topology.
    InvalidBrokerId { broker_id: u32 },
    /// A caller referenced an unknown (topic, index) pair.
    InvalidPartition { partition: PartitionKey },
    /// Requested factor exceeds the active broker count, or a removal
    /// count was greater than or equal to the current replication factor.
    InvalidReplicationFactor { partition: PartitionKey, reason: String },
    /// A replication group has no active (non-decommissioned) brokers.
    /// Surfaced as a warning at the cluster level, not fatal.
    EmptyReplicationGroup { group_id: u32 },
    /// `acquire_partition` found no legal destination broker. Used for
    /// control flow during forced decommission; never surfaced from
    /// `rebalance`.
    NotEligibleGroup { group_id: u32, partition: PartitionKey },
    /// After all reassignment attempts, one or more decommissioned
    /// brokers still hold partitions. Lists exactly which broker still
    /// holds which partitions so the caller can decide what to do next.
    BrokerDecommission {
        stuck: Vec<(u32, Vec<PartitionKey>)>,
    },
    /// A precondition for the requested rebalance pass failed.
    Rebalance { reason: String },
}

impl fmt::Display for BalancerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancerError::InvalidBrokerId { broker_id } => {
                write!(f, "broker id {broker_id} does not exist in cluster")
            }
            BalancerError::InvalidPartition { partition } => {
                write!(f, "partition {partition} not found")
            }
            BalancerError::InvalidReplicationFactor { partition, reason } => {
                write!(f, "invalid replication factor for partition {partition}: {reason}")
            }
            BalancerError::EmptyReplicationGroup { group_id } => {
                write!(f, "no active brokers left in replication group {group_id}")
            }
            BalancerError::NotEligibleGroup { group_id, partition } => {
                write!(
                    f,
                    "no eligible broker in replication group {group_id} to acquire partition {partition}"
                )
            }
            BalancerError::BrokerDecommission { stuck } => {
                write!(f, "broker decommission failed, partitions remain unreassigned: {stuck:?}")
            }
            BalancerError::Rebalance { reason } => write!(f, "rebalance precondition failed: {reason}"),
        }
    }
}

impl std::error::Error for BalancerError {}

impl BalancerError {
    /// True for errors that represent a genuine failure of an operation, as
    /// opposed to an expected/recoverable condition a caller merely logs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BalancerError::EmptyReplicationGroup { .. })
    }

    /// True for errors that are only ever used as internal control flow
    /// (e.g. probing whether a group can accept a partition) and are never
    /// expected to propagate out of [`crate::cluster_balancer::rebalance`].
    pub fn is_control_flow(&self) -> bool {
        matches!(self, BalancerError::NotEligibleGroup { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_invalid_broker_id() {
        let err = BalancerError::InvalidBrokerId { broker_id: 7 };
        assert_eq!(err.to_string(), "broker id 7 does not exist in cluster");
    }

    #[test]
    fn displays_invalid_partition() {
        let err = BalancerError::InvalidPartition {
            partition: PartitionKey::new("orders", 3),
        };
        assert_eq!(err.to_string(), "partition orders-3 not found");
    }

    #[test]
    fn classifies_empty_replication_group_as_non_fatal() {
        let err = BalancerError::EmptyReplicationGroup { group_id: 1 };
        assert!(!err.is_fatal());
        assert!(!err.is_control_flow());
    }

    #[test]
    fn classifies_not_eligible_group_as_control_flow() {
        let err = BalancerError::NotEligibleGroup {
            group_id: 2,
            partition: PartitionKey::new("orders", 0),
        };
        assert!(err.is_control_flow());
        assert!(err.is_fatal());
    }
}
