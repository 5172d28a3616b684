//! Output plan representation (spec.md §6): the reassignment record an
//! external emitter would write out. The core never serializes this
//! itself to disk or a wire format — it only builds the value.

use serde::Serialize;

use crate::topology::ClusterTopology;

/// One partition whose replica list (including order) changed between two
/// snapshots of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReassignment {
    pub topic: String,
    pub partition: u32,
    pub replicas: Vec<u32>,
}

/// `{version: 1, partitions: [...]}` — only partitions that actually moved
/// are included (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReassignmentPlan {
    pub version: u32,
    pub partitions: Vec<PartitionReassignment>,
}

impl ReassignmentPlan {
    /// Diffs `before` against `after`, including only partitions whose
    /// replica list changed. `after` is assumed to be `before` with zero or
    /// more planner operations applied to it; a partition present in
    /// `before` but missing from `after` (or vice versa) is ignored rather
    /// than treated as a move, since the core never creates or destroys
    /// partitions.
    pub fn diff(before: &ClusterTopology, after: &ClusterTopology) -> Self {
        let mut partitions = Vec::new();
        for p in after.partitions() {
            let Ok(prev) = before.partition(&p.key) else { continue };
            if prev.replicas() != p.replicas() {
                partitions.push(PartitionReassignment {
                    topic: p.key.topic.clone(),
                    partition: p.key.index,
                    replicas: p.replicas().iter().map(|b| b.0).collect(),
                });
            }
        }
        ReassignmentPlan { version: 1, partitions }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_balancer::RebalanceOptions;
    use crate::topology::{BrokerId, GroupId, PartitionKey};

    #[test]
    fn diff_includes_only_moved_partitions() {
        let mut topo = ClusterTopology::new();
        topo.add_broker(BrokerId(0), GroupId(0), false);
        topo.add_broker(BrokerId(1), GroupId(1), false);
        topo.add_partition(PartitionKey::new("orders", 0), vec![BrokerId(0)]).unwrap();
        topo.add_partition(PartitionKey::new("orders", 1), vec![BrokerId(1)]).unwrap();

        let before = topo.clone();
        topo.move_replica(&PartitionKey::new("orders", 0), BrokerId(0), BrokerId(1)).unwrap();

        let plan = ReassignmentPlan::diff(&before, &topo);
        assert_eq!(plan.version, 1);
        assert_eq!(plan.partitions.len(), 1);
        assert_eq!(plan.partitions[0].topic, "orders");
        assert_eq!(plan.partitions[0].partition, 0);
        assert_eq!(plan.partitions[0].replicas, vec![1]);
    }

    #[test]
    fn diff_is_empty_for_unchanged_topology() {
        let mut topo = ClusterTopology::new();
        topo.add_broker(BrokerId(0), GroupId(0), false);
        topo.add_partition(PartitionKey::new("t", 0), vec![BrokerId(0)]).unwrap();
        let before = topo.clone();
        assert!(ReassignmentPlan::diff(&before, &topo).is_empty());
    }

    #[test]
    fn diff_serializes_to_expected_json_shape() {
        let mut topo = ClusterTopology::new();
        topo.add_broker(BrokerId(0), GroupId(0), false);
        topo.add_broker(BrokerId(1), GroupId(0), false);
        topo.add_partition(PartitionKey::new("t", 0), vec![BrokerId(0)]).unwrap();
        let before = topo.clone();
        topo.rebalance(RebalanceOptions { brokers: true, ..Default::default() }).unwrap();

        let plan = ReassignmentPlan::diff(&before, &topo);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["partitions"].is_array());
    }
}
