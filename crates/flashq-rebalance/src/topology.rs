//! Topology data model: topics, partitions, brokers, replication groups.
//!
//! `ClusterTopology` exclusively owns all brokers, groups, partitions, and
//! topics. Cross-references (partition <-> broker, broker <-> group) are
//! back-references resolved by id, never ownership, so the graph stays
//! acyclic and serialization-friendly (see DESIGN.md).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BalancerError;

/// Identifies a broker in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BrokerId(pub u32);

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker-{}", self.0)
    }
}

/// Identifies a replication group (availability zone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Identifies a partition by its topic name and index within that topic.
///
/// Field order (`topic` then `index`) is load-bearing: the derived `Ord`
/// gives the "partition (topic,index) ascending" tie-break the planner
/// needs for deterministic output everywhere it is used as a sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub topic: String,
    pub index: u32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, index: u32) -> Self {
        Self { topic: topic.into(), index }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.index)
    }
}

/// A storage/serving node. Replication-group membership is fixed at
/// creation; `decommissioned` and `inactive` are the only mutable flags.
#[derive(Debug, Clone)]
pub struct Broker {
    pub id: BrokerId,
    pub group_id: GroupId,
    pub decommissioned: bool,
    pub inactive: bool,
    partitions: BTreeSet<PartitionKey>,
    leader_partitions: BTreeSet<PartitionKey>,
}

impl Broker {
    fn new(id: BrokerId, group_id: GroupId, inactive: bool) -> Self {
        Self {
            id,
            group_id,
            decommissioned: false,
            inactive,
            partitions: BTreeSet::new(),
            leader_partitions: BTreeSet::new(),
        }
    }

    /// All partitions currently replicated on this broker, in (topic,index)
    /// order.
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.partitions.iter()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn leader_count(&self) -> usize {
        self.leader_partitions.len()
    }

    /// Partitions for which this broker is the preferred leader, in
    /// (topic,index) order.
    pub fn leader_partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.leader_partitions.iter()
    }

    pub fn holds(&self, partition: &PartitionKey) -> bool {
        self.partitions.contains(partition)
    }

    pub fn is_leader_of(&self, partition: &PartitionKey) -> bool {
        self.leader_partitions.contains(partition)
    }

    pub fn empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Count of this broker's partitions belonging to `topic` — the
    /// topic-spread heuristic used by the group-level balancer.
    pub fn count_partitions_of_topic(&self, topic: &str) -> usize {
        self.partitions.iter().filter(|p| p.topic == topic).count()
    }
}

/// A failure domain containing a set of brokers. Every broker belongs to
/// exactly one replication group.
#[derive(Debug, Clone)]
pub struct ReplicationGroup {
    pub id: GroupId,
    broker_ids: BTreeSet<BrokerId>,
}

impl ReplicationGroup {
    fn new(id: GroupId) -> Self {
        Self { id, broker_ids: BTreeSet::new() }
    }

    pub fn broker_ids(&self) -> impl Iterator<Item = &BrokerId> {
        self.broker_ids.iter()
    }

    pub fn broker_count(&self) -> usize {
        self.broker_ids.len()
    }
}

/// A shard of a topic. `replicas[0]` is always the preferred leader.
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: PartitionKey,
    replicas: Vec<BrokerId>,
}

impl Partition {
    pub fn replicas(&self) -> &[BrokerId] {
        &self.replicas
    }

    pub fn replication_factor(&self) -> usize {
        self.replicas.len()
    }

    pub fn leader(&self) -> BrokerId {
        self.replicas[0]
    }

    pub fn contains(&self, broker: BrokerId) -> bool {
        self.replicas.contains(&broker)
    }
}

/// A topic's identity: its name and the set of partition indices that
/// belong to it.
#[derive(Debug, Clone, Default)]
pub struct Topic {
    pub name: String,
    partition_indices: BTreeSet<u32>,
}

impl Topic {
    pub fn partition_indices(&self) -> impl Iterator<Item = &u32> {
        self.partition_indices.iter()
    }
}

/// Input shape for one broker, as an external loader would construct it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSpec {
    pub id: u32,
    #[serde(default)]
    pub host: Option<String>,
    pub replication_group_id: u32,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub decommissioned: bool,
}

/// Input shape for one partition, as an external loader would construct
/// it. `replicas[0]` is the preferred leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub topic: String,
    pub index: u32,
    pub replicas: Vec<u32>,
}

/// The tripartite {replication group -> broker -> partition replica}
/// structure the planner operates on.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    brokers: BTreeMap<BrokerId, Broker>,
    groups: BTreeMap<GroupId, ReplicationGroup>,
    partitions: BTreeMap<PartitionKey, Partition>,
    topics: BTreeMap<String, Topic>,
}

impl ClusterTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology from the external-loader input shapes described in
    /// spec.md §6. Fails if a partition references an unknown broker or if
    /// any replica list has a duplicate broker.
    pub fn from_specs(brokers: Vec<BrokerSpec>, partitions: Vec<PartitionSpec>) -> Result<Self, BalancerError> {
        let mut topology = Self::new();
        for spec in brokers {
            let broker_id = BrokerId(spec.id);
            let group_id = GroupId(spec.replication_group_id);
            topology.add_broker(broker_id, group_id, spec.inactive);
            if spec.decommissioned {
                topology.mark_decommissioned(broker_id)?;
            }
        }
        for spec in partitions {
            let replicas: Vec<BrokerId> = spec.replicas.into_iter().map(BrokerId).collect();
            for &broker_id in &replicas {
                if !topology.brokers.contains_key(&broker_id) {
                    return Err(BalancerError::InvalidBrokerId { broker_id: broker_id.0 });
                }
            }
            topology.add_partition(PartitionKey::new(spec.topic, spec.index), replicas)?;
        }
        Ok(topology)
    }

    /// Registers a broker and its (pre-existing or new) replication group.
    pub fn add_broker(&mut self, id: BrokerId, group_id: GroupId, inactive: bool) {
        self.groups.entry(group_id).or_insert_with(|| ReplicationGroup::new(group_id));
        self.groups.get_mut(&group_id).unwrap().broker_ids.insert(id);
        self.brokers.entry(id).or_insert_with(|| Broker::new(id, group_id, inactive));
    }

    /// Registers a partition with its initial replica placement, updating
    /// broker and topic back-references.
    pub fn add_partition(&mut self, key: PartitionKey, replicas: Vec<BrokerId>) -> Result<(), BalancerError> {
        let mut seen = BTreeSet::new();
        for &broker_id in &replicas {
            if !seen.insert(broker_id) {
                return Err(BalancerError::InvalidReplicationFactor {
                    partition: key.clone(),
                    reason: format!("broker {broker_id} appears twice in the replica list"),
                });
            }
            if !self.brokers.contains_key(&broker_id) {
                return Err(BalancerError::InvalidBrokerId { broker_id: broker_id.0 });
            }
        }

        self.topics
            .entry(key.topic.clone())
            .or_insert_with(|| Topic { name: key.topic.clone(), partition_indices: BTreeSet::new() })
            .partition_indices
            .insert(key.index);

        for (pos, &broker_id) in replicas.iter().enumerate() {
            let broker = self.brokers.get_mut(&broker_id).expect("checked above");
            broker.partitions.insert(key.clone());
            if pos == 0 {
                broker.leader_partitions.insert(key.clone());
            }
        }

        self.partitions.insert(key.clone(), Partition { key, replicas });
        Ok(())
    }

    pub fn broker(&self, id: BrokerId) -> Result<&Broker, BalancerError> {
        self.brokers.get(&id).ok_or(BalancerError::InvalidBrokerId { broker_id: id.0 })
    }

    pub(crate) fn broker_mut(&mut self, id: BrokerId) -> Result<&mut Broker, BalancerError> {
        self.brokers.get_mut(&id).ok_or(BalancerError::InvalidBrokerId { broker_id: id.0 })
    }

    pub fn group(&self, id: GroupId) -> Result<&ReplicationGroup, BalancerError> {
        self.groups.get(&id).ok_or(BalancerError::EmptyReplicationGroup { group_id: id.0 })
    }

    pub fn partition(&self, key: &PartitionKey) -> Result<&Partition, BalancerError> {
        self.partitions.get(key).ok_or_else(|| BalancerError::InvalidPartition { partition: key.clone() })
    }

    /// All brokers, in ascending id order.
    pub fn brokers(&self) -> impl Iterator<Item = &Broker> {
        self.brokers.values()
    }

    /// All replication groups, in ascending id order.
    pub fn groups(&self) -> impl Iterator<Item = &ReplicationGroup> {
        self.groups.values()
    }

    /// All partitions, in ascending (topic,index) order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    /// Count of brokers not flagged decommissioned. `add_replica` (spec.md
    /// §4.3.4) places new replicas only among these.
    pub fn active_broker_count(&self) -> usize {
        self.brokers.values().filter(|b| !b.decommissioned).count()
    }

    /// Count of `group_id`'s brokers not flagged decommissioned — the
    /// group's real capacity for a new replica, as opposed to
    /// [`ReplicationGroup::broker_count`] which includes decommissioned
    /// brokers still being drained.
    pub fn group_active_broker_count(&self, group_id: GroupId) -> Result<usize, BalancerError> {
        let group = self.group(group_id)?;
        Ok(group.broker_ids().filter(|b| self.broker(**b).map(|b| !b.decommissioned).unwrap_or(false)).count())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn has_inactive_brokers(&self) -> bool {
        self.brokers.values().any(|b| b.inactive)
    }

    /// All partition replicas currently placed in `group_id`, in
    /// (topic,index) order. By invariant a group holds at most one replica
    /// of any given partition (two brokers in the same group can't both
    /// hold it without violating the spread invariant the planner restores).
    pub fn group_partitions(&self, group_id: GroupId) -> Result<Vec<PartitionKey>, BalancerError> {
        let group = self.group(group_id)?;
        let mut keys: BTreeSet<PartitionKey> = BTreeSet::new();
        for broker_id in group.broker_ids() {
            if let Ok(broker) = self.broker(*broker_id) {
                keys.extend(broker.partitions().cloned());
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Number of replicas of `partition` held within `group_id` (0 or 1 by
    /// invariant).
    pub fn group_replica_count(&self, group_id: GroupId, partition: &PartitionKey) -> Result<usize, BalancerError> {
        let group = self.group(group_id)?;
        Ok(group
            .broker_ids()
            .filter(|b| self.broker(**b).map(|b| b.holds(partition)).unwrap_or(false))
            .count())
    }

    /// All partition keys belonging to `topic`, in ascending index order.
    /// Used by the group-level balancer to find siblings of a moved
    /// partition (spec.md GLOSSARY "Sibling of a partition").
    pub fn topic_partitions(&self, topic: &str) -> Vec<PartitionKey> {
        self.topics
            .get(topic)
            .map(|t| t.partition_indices().map(|&index| PartitionKey::new(topic, index)).collect())
            .unwrap_or_default()
    }

    pub fn mark_decommissioned(&mut self, broker_id: BrokerId) -> Result<(), BalancerError> {
        self.broker_mut(broker_id)?.decommissioned = true;
        Ok(())
    }

    /// Moves one replica of `partition` from broker `from` to broker `to`,
    /// preserving leader status if the moved replica was the leader.
    /// Callers (group/cluster balancers) are responsible for verifying the
    /// move is legal (`to` doesn't already hold the partition, `from` does);
    /// this is the low-level mutator that keeps back-references consistent.
    pub(crate) fn move_replica(&mut self, partition: &PartitionKey, from: BrokerId, to: BrokerId) -> Result<(), BalancerError> {
        let was_leader = {
            let p = self.partitions.get_mut(partition).ok_or_else(|| BalancerError::InvalidPartition { partition: partition.clone() })?;
            let pos = p
                .replicas
                .iter()
                .position(|&b| b == from)
                .ok_or_else(|| BalancerError::InvalidReplicationFactor {
                    partition: partition.clone(),
                    reason: format!("{from} does not hold this partition"),
                })?;
            if p.replicas.contains(&to) {
                return Err(BalancerError::InvalidReplicationFactor {
                    partition: partition.clone(),
                    reason: format!("{to} already holds this partition"),
                });
            }
            p.replicas[pos] = to;
            pos == 0
        };

        if let Some(src) = self.brokers.get_mut(&from) {
            src.partitions.remove(partition);
            if was_leader {
                src.leader_partitions.remove(partition);
            }
        }
        if let Some(dst) = self.brokers.get_mut(&to) {
            dst.partitions.insert(partition.clone());
            if was_leader {
                dst.leader_partitions.insert(partition.clone());
            }
        }
        tracing::debug!(%partition, %from, %to, "moved partition replica");
        Ok(())
    }

    /// Reorders `partition`'s replica list so `new_leader` is first,
    /// preserving the relative order of the remaining replicas.
    pub(crate) fn swap_leader(&mut self, partition: &PartitionKey, new_leader: BrokerId) -> Result<(), BalancerError> {
        let old_leader = {
            let p = self.partitions.get_mut(partition).ok_or_else(|| BalancerError::InvalidPartition { partition: partition.clone() })?;
            let pos = p.replicas.iter().position(|&b| b == new_leader).ok_or_else(|| BalancerError::InvalidReplicationFactor {
                partition: partition.clone(),
                reason: format!("{new_leader} is not a replica of this partition"),
            })?;
            if pos == 0 {
                return Ok(());
            }
            let old_leader = p.replicas[0];
            let replica = p.replicas.remove(pos);
            p.replicas.insert(0, replica);
            old_leader
        };

        if let Some(old) = self.brokers.get_mut(&old_leader) {
            old.leader_partitions.remove(partition);
        }
        if let Some(new) = self.brokers.get_mut(&new_leader) {
            new.leader_partitions.insert(partition.clone());
        }
        tracing::debug!(%partition, %old_leader, %new_leader, "swapped preferred leader");
        Ok(())
    }

    /// Appends a new replica of `partition` on `broker`. Used by
    /// `add_replica`; does not touch leadership.
    pub(crate) fn append_replica(&mut self, partition: &PartitionKey, broker: BrokerId) -> Result<(), BalancerError> {
        let p = self.partitions.get_mut(partition).ok_or_else(|| BalancerError::InvalidPartition { partition: partition.clone() })?;
        p.replicas.push(broker);
        self.brokers.get_mut(&broker).expect("caller validated broker exists").partitions.insert(partition.clone());
        Ok(())
    }

    /// Removes `broker`'s replica of `partition` from the replica list.
    /// Used by `remove_replica`. Does not reseat the leader; callers do
    /// that explicitly via `swap_leader` after all removals complete.
    pub(crate) fn remove_replica_from_list(&mut self, partition: &PartitionKey, broker: BrokerId) -> Result<(), BalancerError> {
        let was_leader = {
            let p = self.partitions.get_mut(partition).ok_or_else(|| BalancerError::InvalidPartition { partition: partition.clone() })?;
            let pos = p.replicas.iter().position(|&b| b == broker).ok_or_else(|| BalancerError::InvalidReplicationFactor {
                partition: partition.clone(),
                reason: format!("{broker} does not hold this partition"),
            })?;
            p.replicas.remove(pos);
            pos == 0
        };
        if let Some(b) = self.brokers.get_mut(&broker) {
            b.partitions.remove(partition);
            if was_leader {
                b.leader_partitions.remove(partition);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_group_topology() -> ClusterTopology {
        let mut topo = ClusterTopology::new();
        for group in 0..3u32 {
            for broker in 0..2u32 {
                let id = group * 10 + broker;
                topo.add_broker(BrokerId(id), GroupId(group), false);
            }
        }
        topo
    }

    #[test]
    fn add_partition_rejects_duplicate_broker() {
        let mut topo = three_group_topology();
        let err = topo
            .add_partition(PartitionKey::new("t", 0), vec![BrokerId(0), BrokerId(0)])
            .unwrap_err();
        assert!(matches!(err, BalancerError::InvalidReplicationFactor { .. }));
    }

    #[test]
    fn add_partition_rejects_unknown_broker() {
        let mut topo = three_group_topology();
        let err = topo.add_partition(PartitionKey::new("t", 0), vec![BrokerId(999)]).unwrap_err();
        assert!(matches!(err, BalancerError::InvalidBrokerId { broker_id: 999 }));
    }

    #[test]
    fn move_replica_preserves_leader_and_back_references() {
        let mut topo = three_group_topology();
        let key = PartitionKey::new("t", 0);
        topo.add_partition(key.clone(), vec![BrokerId(0), BrokerId(10)]).unwrap();
        topo.move_replica(&key, BrokerId(0), BrokerId(1)).unwrap();

        let partition = topo.partition(&key).unwrap();
        assert_eq!(partition.replicas(), &[BrokerId(1), BrokerId(10)]);
        assert!(topo.broker(BrokerId(1)).unwrap().is_leader_of(&key));
        assert!(!topo.broker(BrokerId(0)).unwrap().holds(&key));
        assert!(topo.broker(BrokerId(1)).unwrap().holds(&key));
    }

    #[test]
    fn swap_leader_preserves_follower_order() {
        let mut topo = three_group_topology();
        let key = PartitionKey::new("t", 0);
        topo.add_partition(key.clone(), vec![BrokerId(0), BrokerId(1), BrokerId(10)]).unwrap();
        topo.swap_leader(&key, BrokerId(10)).unwrap();

        let partition = topo.partition(&key).unwrap();
        assert_eq!(partition.replicas(), &[BrokerId(10), BrokerId(0), BrokerId(1)]);
        assert!(topo.broker(BrokerId(10)).unwrap().is_leader_of(&key));
        assert!(!topo.broker(BrokerId(0)).unwrap().is_leader_of(&key));
    }

    #[test]
    fn group_partitions_reflects_membership() {
        let mut topo = three_group_topology();
        let key = PartitionKey::new("t", 0);
        topo.add_partition(key.clone(), vec![BrokerId(0), BrokerId(10)]).unwrap();
        let group0 = topo.group_partitions(GroupId(0)).unwrap();
        assert_eq!(group0, vec![key.clone()]);
        assert_eq!(topo.group_replica_count(GroupId(0), &key).unwrap(), 1);
        assert_eq!(topo.group_replica_count(GroupId(2), &key).unwrap(), 0);
    }
}
