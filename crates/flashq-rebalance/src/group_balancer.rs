//! Group-level balancer: operations that rebalance within a single
//! replication group (spec.md §4.2).
//!
//! Back-references between partitions, brokers, and groups are ids, not
//! owned handles (see topology.rs), so these operations are implemented as
//! inherent methods on [`ClusterTopology`] parameterized by [`GroupId`]
//! rather than methods on a standalone `ReplicationGroup` handle.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::error::BalancerError;
use crate::topology::{BrokerId, ClusterTopology, GroupId, PartitionKey};
use crate::util::separate_groups;

/// Key for the sibling-count cache: how many partitions of a given
/// partition's topic a candidate destination broker already holds. Local
/// to one `rebalance_group_brokers` call; absence means zero (spec.md §9).
type SiblingCache = BTreeMap<(PartitionKey, BrokerId), usize>;

impl ClusterTopology {
    fn active_over_under(&self, active_ids: &[BrokerId], total: usize) -> (Vec<BrokerId>, Vec<BrokerId>) {
        separate_groups(active_ids, |id| self.broker(*id).expect("active id valid").partition_count(), total, |id| *id)
    }

    fn preferred_eligible_partition(&self, source: BrokerId, dest: BrokerId, sibling_cache: &SiblingCache) -> Option<PartitionKey> {
        let source_b = self.broker(source).ok()?;
        let dest_b = self.broker(dest).ok()?;
        source_b
            .partitions()
            .filter(|pk| !dest_b.holds(pk))
            .cloned()
            .min_by_key(|pk| (sibling_cache.get(&(pk.clone(), dest)).copied().unwrap_or(0), pk.clone()))
    }

    /// Finds the single best (source, destination, partition) move for one
    /// iteration of the intra-group rebalance loop, or `None` if no legal
    /// move exists (the loop then stops — spec.md §9's documented silent
    /// no-op for exhausted balance loops).
    fn find_best_intra_group_move(
        &self,
        over: &[BrokerId],
        under: &[BrokerId],
        decommissioned_over: &[BrokerId],
        sibling_cache: &SiblingCache,
    ) -> Option<(BrokerId, BrokerId, PartitionKey)> {
        let mut combined: Vec<BrokerId> = over.iter().chain(decommissioned_over.iter()).copied().collect();
        combined.sort_by_key(|id| (Reverse(self.broker(*id).expect("valid").partition_count()), *id));

        let mut under_sorted: Vec<BrokerId> = under.to_vec();
        under_sorted.sort_by_key(|id| (self.broker(*id).expect("valid").partition_count(), *id));

        let mut target: Option<(BrokerId, BrokerId, PartitionKey)> = None;
        let mut min_sibling_count: Option<usize> = None;

        for &source in &combined {
            let source_broker = self.broker(source).expect("valid");
            let source_count = source_broker.partition_count();
            let source_decommissioned = source_broker.decommissioned;

            for &dest in &under_sorted {
                let dest_count = self.broker(dest).expect("valid").partition_count();
                let relatively_unbalanced = source_count as i64 - dest_count as i64 > 1;
                if !(relatively_unbalanced || source_decommissioned) {
                    // `under_sorted` is ascending, so this stays false for
                    // every later (larger-count) destination too.
                    break;
                }
                let Some(candidate) = self.preferred_eligible_partition(source, dest, sibling_cache) else {
                    continue;
                };
                let sibling_count = sibling_cache.get(&(candidate.clone(), dest)).copied().unwrap_or(0);
                if min_sibling_count.is_none_or(|min| sibling_count < min) {
                    min_sibling_count = Some(sibling_count);
                    target = Some((source, dest, candidate));
                    if sibling_count == 0 {
                        break;
                    }
                }
            }
        }
        target
    }

    fn update_sibling_cache(&self, cache: &mut SiblingCache, moved_partition: &PartitionKey, dest: BrokerId) {
        for sibling in self.topic_partitions(&moved_partition.topic) {
            *cache.entry((sibling, dest)).or_insert(0) += 1;
        }
    }

    /// Equalizes partition counts across `group_id`'s active brokers,
    /// using any decommissioned brokers still holding partitions as
    /// forced donors (spec.md §4.2.1).
    ///
    /// Fails with [`BalancerError::EmptyReplicationGroup`] if the group has
    /// no active brokers at all; callers treat this as a warning, not a
    /// fatal error (spec.md §7).
    pub fn rebalance_group_brokers(&mut self, group_id: GroupId) -> Result<(), BalancerError> {
        let all_ids: Vec<BrokerId> = self.group(group_id)?.broker_ids().copied().collect();
        let active_ids: Vec<BrokerId> =
            all_ids.iter().copied().filter(|id| !self.broker(*id).expect("valid").decommissioned).collect();
        if active_ids.is_empty() {
            return Err(BalancerError::EmptyReplicationGroup { group_id: group_id.0 });
        }

        // The quotient is computed over *every* broker in the group,
        // decommissioned ones included, so a decommissioned broker's load
        // still counts toward what "balanced" means for the active set —
        // otherwise an already-self-balanced active set has no `under`
        // bucket left to absorb a decommissioned broker's replicas.
        let total: usize = all_ids.iter().map(|id| self.broker(*id).expect("valid").partition_count()).sum();
        let mut sibling_cache = SiblingCache::new();
        let mut moves = 0usize;

        loop {
            let (over, under) = self.active_over_under(&active_ids, total);
            let decommissioned_over: Vec<BrokerId> = all_ids
                .iter()
                .copied()
                .filter(|id| {
                    let b = self.broker(*id).expect("valid");
                    b.decommissioned && !b.empty()
                })
                .collect();

            if over.is_empty() && decommissioned_over.is_empty() {
                break;
            }

            match self.find_best_intra_group_move(&over, &under, &decommissioned_over, &sibling_cache) {
                Some((source, dest, partition)) => {
                    self.move_replica(&partition, source, dest)?;
                    self.update_sibling_cache(&mut sibling_cache, &partition, dest);
                    moves += 1;
                }
                None => break,
            }
        }
        tracing::info!(%group_id, moves, "intra-group broker rebalance complete");
        Ok(())
    }

    fn select_cross_group_source(&self, group_id: GroupId, partition: &PartitionKey) -> Result<Option<BrokerId>, BalancerError> {
        let group = self.group(group_id)?;
        let mut candidates: Vec<BrokerId> =
            group.broker_ids().copied().filter(|id| self.broker(*id).map(|b| b.holds(partition)).unwrap_or(false)).collect();
        candidates.sort_by_key(|id| {
            let b = self.broker(*id).expect("valid");
            (Reverse(b.count_partitions_of_topic(&partition.topic)), Reverse(b.partition_count()), *id)
        });
        Ok(candidates.into_iter().next())
    }

    fn select_cross_group_dest(&self, group_id: GroupId, partition: &PartitionKey) -> Result<Option<BrokerId>, BalancerError> {
        let group = self.group(group_id)?;
        let mut candidates: Vec<BrokerId> =
            group.broker_ids().copied().filter(|id| self.broker(*id).map(|b| !b.holds(partition)).unwrap_or(false)).collect();
        candidates.sort_by_key(|id| {
            let b = self.broker(*id).expect("valid");
            (b.count_partitions_of_topic(&partition.topic), b.partition_count(), *id)
        });
        Ok(candidates.into_iter().next())
    }

    /// Moves one replica of `partition` from `source_group` to
    /// `dest_group`, selecting source and destination brokers per
    /// spec.md §4.2.2. Returns `Ok(false)` rather than an error when no
    /// legal broker pair exists — this helper is called from inside
    /// balance loops, which silently skip an unmovable partition
    /// (spec.md §9).
    pub fn move_partition_between_groups(
        &mut self,
        partition: &PartitionKey,
        source_group: GroupId,
        dest_group: GroupId,
    ) -> Result<bool, BalancerError> {
        let Some(source_broker) = self.select_cross_group_source(source_group, partition)? else {
            return Ok(false);
        };
        let Some(dest_broker) = self.select_cross_group_dest(dest_group, partition)? else {
            return Ok(false);
        };
        self.move_replica(partition, source_broker, dest_broker)?;
        tracing::debug!(%partition, from_group = %source_group, to_group = %dest_group, "moved partition across replication groups");
        Ok(true)
    }

    /// Tries to accept a replica of `partition` from `source_broker` (which
    /// lives in another group) into `group_id`. Unlike
    /// [`Self::move_partition_between_groups`], this is explicitly invoked
    /// (e.g. by forced decommission) and raises
    /// [`BalancerError::NotEligibleGroup`] rather than silently no-op'ing
    /// when no broker in the group is a legal target.
    pub fn acquire_partition(&mut self, group_id: GroupId, partition: &PartitionKey, source_broker: BrokerId) -> Result<BrokerId, BalancerError> {
        let dest_broker = self
            .select_cross_group_dest(group_id, partition)?
            .ok_or_else(|| BalancerError::NotEligibleGroup { group_id: group_id.0, partition: partition.clone() })?;
        self.move_replica(partition, source_broker, dest_broker)?;
        Ok(dest_broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ClusterTopology, GroupId, PartitionKey};

    fn build(counts: &[usize]) -> (ClusterTopology, GroupId) {
        let mut topo = ClusterTopology::new();
        let group_id = GroupId(0);
        for (i, _) in counts.iter().enumerate() {
            topo.add_broker(BrokerId(i as u32), group_id, false);
        }
        let mut next_index = 0u32;
        for (broker_idx, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let key = PartitionKey::new("t", next_index);
                next_index += 1;
                topo.add_partition(key, vec![BrokerId(broker_idx as u32)]).unwrap();
            }
        }
        (topo, group_id)
    }

    #[test]
    fn rebalance_brokers_equalizes_four_brokers() {
        let (mut topo, group_id) = build(&[8, 2, 2, 0]);
        topo.rebalance_group_brokers(group_id).unwrap();
        let mut counts: Vec<usize> = (0..4).map(|i| topo.broker(BrokerId(i)).unwrap().partition_count()).collect();
        counts.sort();
        assert_eq!(counts, vec![3, 3, 3, 3]);

        // No partition held twice anywhere.
        for partition in topo.partitions() {
            assert_eq!(partition.replication_factor(), 1);
        }
    }

    #[test]
    fn rebalance_brokers_is_noop_when_already_balanced() {
        let (mut topo, group_id) = build(&[3, 3, 3]);
        topo.rebalance_group_brokers(group_id).unwrap();
        let counts: Vec<usize> = (0..3).map(|i| topo.broker(BrokerId(i)).unwrap().partition_count()).collect();
        assert_eq!(counts, vec![3, 3, 3]);
    }

    #[test]
    fn rebalance_brokers_fails_on_fully_decommissioned_group() {
        let (mut topo, group_id) = build(&[2, 2]);
        topo.mark_decommissioned(BrokerId(0)).unwrap();
        topo.mark_decommissioned(BrokerId(1)).unwrap();
        let err = topo.rebalance_group_brokers(group_id).unwrap_err();
        assert!(matches!(err, BalancerError::EmptyReplicationGroup { .. }));
    }

    #[test]
    fn acquire_partition_fails_when_every_broker_already_holds_it() {
        let mut topo = ClusterTopology::new();
        topo.add_broker(BrokerId(0), GroupId(0), false);
        topo.add_broker(BrokerId(1), GroupId(1), false);
        let key = PartitionKey::new("t", 0);
        topo.add_partition(key.clone(), vec![BrokerId(1)]).unwrap();
        // broker 1 is the only broker in group 1, and it already holds it.
        let err = topo.acquire_partition(GroupId(1), &key, BrokerId(0)).unwrap_err();
        assert!(matches!(err, BalancerError::NotEligibleGroup { .. }));
    }
}
