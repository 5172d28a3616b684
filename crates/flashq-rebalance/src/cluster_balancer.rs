//! Cluster-level balancer: the outer orchestrator (spec.md §4.3).
//!
//! Operates across replication groups and brokers; every pass here either
//! delegates to [`crate::group_balancer`] for the intra-group work or walks
//! the topology directly. Ordering across passes is fixed by
//! [`ClusterTopology::rebalance`]: replication groups, then brokers, then
//! leaders — a later pass never undoes what an earlier one established.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::BalancerError;
use crate::topology::{BrokerId, ClusterTopology, GroupId, PartitionKey};
use crate::util::{compute_optimum, separate_groups};

/// Options for [`ClusterTopology::rebalance`] (spec.md §4.3.1). A flat,
/// serde-(de)serializable record so an embedding host can load it from
/// config the same way it loads other manifests, without this crate
/// depending on a parsing crate itself.
///
/// There is deliberately no `max_movement_size` field: that belongs to a
/// size-aware sibling balancer this crate does not implement (spec.md §1
/// Non-goals), so a caller has nothing byte-budget-shaped to set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOptions {
    #[serde(default)]
    pub replication_groups: bool,
    #[serde(default)]
    pub brokers: bool,
    #[serde(default)]
    pub leaders: bool,
    #[serde(default)]
    pub max_partition_movements: Option<usize>,
    #[serde(default)]
    pub max_leader_changes: Option<usize>,
}

fn budget_exhausted(budget: &Option<usize>) -> bool {
    matches!(budget, Some(0))
}

fn consume_budget(budget: &mut Option<usize>) {
    if let Some(n) = budget {
        *n -= 1;
    }
}

impl ClusterTopology {
    /// Runs the requested passes in the fixed order replication_groups ->
    /// brokers -> leaders (spec.md §4.3.1).
    pub fn rebalance(&mut self, options: RebalanceOptions) -> Result<(), BalancerError> {
        if options.replication_groups {
            if self.has_inactive_brokers() {
                return Err(BalancerError::Rebalance {
                    reason: "cannot rebalance replication groups while inactive brokers are present".to_string(),
                });
            }
            tracing::info!("rebalancing replica-count over replication groups");
            let mut budget = options.max_partition_movements;
            self.rebalance_replicas(&mut budget)?;
            self.rebalance_groups_partition_count(&mut budget)?;
        }

        if options.brokers {
            tracing::info!("rebalancing partition-count across brokers");
            let group_ids: Vec<GroupId> = self.groups().map(|g| g.id).collect();
            for group_id in group_ids {
                match self.rebalance_group_brokers(group_id) {
                    Ok(()) => {}
                    Err(BalancerError::EmptyReplicationGroup { group_id }) => {
                        tracing::warn!(group_id, "no active brokers left in replication group");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if options.leaders {
            tracing::info!("rebalancing leader-count across brokers");
            self.rebalance_leaders(options.max_leader_changes)?;
        }

        Ok(())
    }

    /// First replication-group pass: for each partition independently,
    /// equalize its replica count across groups (spec.md §4.3.1). Moves one
    /// replica at a time between the currently-most-over and
    /// currently-most-under group for that partition; silently stops on a
    /// partition when no legal broker pair exists (spec.md §9).
    fn rebalance_replicas(&mut self, budget: &mut Option<usize>) -> Result<(), BalancerError> {
        let group_ids: Vec<GroupId> = self.groups().map(|g| g.id).collect();
        if group_ids.len() <= 1 {
            return Ok(());
        }
        let partition_keys: Vec<PartitionKey> = self.partitions().map(|p| p.key.clone()).collect();

        for key in partition_keys {
            loop {
                if budget_exhausted(budget) {
                    return Ok(());
                }
                let rf = self.partition(&key)?.replication_factor();
                let (mut over, mut under) =
                    separate_groups(&group_ids, |id| self.group_replica_count(*id, &key).unwrap_or(0), rf, |id| *id);
                if over.is_empty() || under.is_empty() {
                    break;
                }
                over.sort_by_key(|id| (Reverse(self.group_replica_count(*id, &key).unwrap_or(0)), *id));
                under.sort_by_key(|id| (self.group_replica_count(*id, &key).unwrap_or(0), *id));

                let source = over[0];
                let dest = under[0];
                if self.move_partition_between_groups(&key, source, dest)? {
                    consume_budget(budget);
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Second replication-group pass: equalize total partition counts
    /// across groups without worsening per-partition group balance
    /// (spec.md §4.3.1). Group iteration order is pinned to ascending
    /// group id (spec.md §9 Open Question).
    fn rebalance_groups_partition_count(&mut self, budget: &mut Option<usize>) -> Result<(), BalancerError> {
        let group_ids: Vec<GroupId> = self.groups().map(|g| g.id).collect();
        if group_ids.len() <= 1 {
            return Ok(());
        }
        let total_elements: usize = group_ids.iter().map(|id| self.group_partitions(*id).map(|p| p.len()).unwrap_or(0)).sum();
        let (over, under) = separate_groups(&group_ids, |id| self.group_partitions(*id).map(|p| p.len()).unwrap_or(0), total_elements, |id| *id);
        if over.is_empty() || under.is_empty() {
            tracing::info!("replication groups already balanced by partition count");
            return Ok(());
        }

        let (opt_partition_cnt, _) = compute_optimum(group_ids.len(), total_elements);
        let mut over_sorted = over;
        over_sorted.sort();
        let mut under_sorted = under;
        under_sorted.sort();

        'outer: for over_rg in over_sorted {
            for under_rg in &under_sorted {
                let under_rg = *under_rg;
                let mut eligible: Vec<PartitionKey> = self
                    .group_partitions(over_rg)?
                    .into_iter()
                    .filter(|p| {
                        let rf = self.partition(p).map(|p| p.replication_factor()).unwrap_or(0);
                        let quotient = rf / group_ids.len();
                        self.group_replica_count(over_rg, p).unwrap_or(0) > quotient
                            && self.group_replica_count(under_rg, p).unwrap_or(0) <= quotient
                    })
                    .collect();
                eligible.sort();

                for partition in eligible {
                    if budget_exhausted(budget) {
                        return Ok(());
                    }
                    let over_count = self.group_partitions(over_rg)?.len();
                    let under_count = self.group_partitions(under_rg)?.len();
                    if over_count as i64 - under_count as i64 > 1 {
                        if self.move_partition_between_groups(&partition, over_rg, under_rg)? {
                            consume_budget(budget);
                        }
                    } else {
                        break;
                    }
                    let under_count = self.group_partitions(under_rg)?.len();
                    let over_count = self.group_partitions(over_rg)?.len();
                    if under_count == opt_partition_cnt || over_count == opt_partition_cnt {
                        break;
                    }
                }
                if self.group_partitions(over_rg)?.len() == opt_partition_cnt {
                    continue 'outer;
                }
            }
        }
        Ok(())
    }

    /// Decommissions a set of brokers (spec.md §4.3.2). All-or-nothing on
    /// id validation: no broker is marked decommissioned if any id is
    /// unknown.
    pub fn decommission_brokers(&mut self, broker_ids: &[BrokerId]) -> Result<(), BalancerError> {
        for &id in broker_ids {
            self.broker(id)?;
        }

        let mut affected_groups = BTreeSet::new();
        for &id in broker_ids {
            affected_groups.insert(self.broker(id)?.group_id);
            self.mark_decommissioned(id)?;
        }

        for group_id in affected_groups {
            match self.rebalance_group_brokers(group_id) {
                Ok(()) => {}
                Err(BalancerError::EmptyReplicationGroup { group_id }) => {
                    tracing::warn!(group_id, "no active brokers left in replication group");
                }
                Err(e) => return Err(e),
            }
        }

        let mut stuck = Vec::new();
        for &id in broker_ids {
            self.force_decommission_broker(id)?;
            let remaining: Vec<PartitionKey> = self.broker(id)?.partitions().cloned().collect();
            if !remaining.is_empty() {
                tracing::error!(broker_id = id.0, ?remaining, "broker could not be decommissioned");
                stuck.push((id.0, remaining));
            }
        }

        if !stuck.is_empty() {
            return Err(BalancerError::BrokerDecommission { stuck });
        }
        Ok(())
    }

    /// Forces every remaining replica off a decommissioned broker into some
    /// other replication group, trying groups in ascending order of their
    /// current replica count for that partition (spec.md §4.3.2 step 4).
    fn force_decommission_broker(&mut self, broker_id: BrokerId) -> Result<(), BalancerError> {
        let broker = self.broker(broker_id)?;
        if !broker.decommissioned || broker.empty() {
            return Ok(());
        }
        let own_group = broker.group_id;
        let remaining: Vec<PartitionKey> = broker.partitions().cloned().collect();

        for partition in remaining {
            if !self.broker(broker_id)?.holds(&partition) {
                continue;
            }
            tracing::debug!(broker_id = broker_id.0, %partition, "force-moving partition off decommissioned broker");
            let mut candidate_groups: Vec<GroupId> = self.groups().map(|g| g.id).filter(|g| *g != own_group).collect();
            candidate_groups.sort_by_key(|g| (self.group_replica_count(*g, &partition).unwrap_or(0), *g));

            for group_id in candidate_groups {
                match self.acquire_partition(group_id, &partition, broker_id) {
                    Ok(_) => break,
                    Err(BalancerError::NotEligibleGroup { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Increases a partition's replication factor by `count` (spec.md
    /// §4.3.4).
    pub fn add_replica(&mut self, partition_key: &PartitionKey, count: usize) -> Result<(), BalancerError> {
        let rf = self.partition(partition_key)?.replication_factor();
        let active_brokers = self.active_broker_count();
        if rf + count > active_brokers {
            return Err(BalancerError::InvalidReplicationFactor {
                partition: partition_key.clone(),
                reason: format!("cannot increase replication factor to {}; only {active_brokers} active brokers exist", rf + count),
            });
        }

        let mut non_full_groups: Vec<GroupId> = self
            .groups()
            .filter(|g| self.group_replica_count(g.id, partition_key).unwrap_or(0) < self.group_active_broker_count(g.id).unwrap_or(0))
            .map(|g| g.id)
            .collect();

        for _ in 0..count {
            let total_replicas: usize = non_full_groups.iter().map(|g| self.group_replica_count(*g, partition_key).unwrap_or(0)).sum();
            let (opt_replicas, _) = compute_optimum(non_full_groups.len(), total_replicas);
            let under_replicated: Vec<GroupId> =
                non_full_groups.iter().copied().filter(|g| self.group_replica_count(*g, partition_key).unwrap_or(0) < opt_replicas).collect();
            let candidates = if under_replicated.is_empty() { non_full_groups.clone() } else { under_replicated };

            let chosen = candidates
                .iter()
                .copied()
                .min_by_key(|g| (self.group_partitions(*g).map(|p| p.len()).unwrap_or(0), *g))
                .expect("candidates non-empty: rf + count <= active broker count guarantees capacity");

            let broker = self
                .group(chosen)?
                .broker_ids()
                .copied()
                .filter(|b| self.broker(*b).map(|b| !b.holds(partition_key) && !b.decommissioned).unwrap_or(false))
                .min_by_key(|b| (self.broker(*b).map(|b| b.partition_count()).unwrap_or(usize::MAX), *b))
                .expect("chosen group is non-full: at least one active broker lacks this partition");

            self.append_replica(partition_key, broker)?;
            tracing::debug!(%partition_key, broker_id = broker.0, group_id = chosen.0, "added replica");

            if self.group_replica_count(chosen, partition_key)? >= self.group_active_broker_count(chosen)? {
                non_full_groups.retain(|g| *g != chosen);
            }
        }
        Ok(())
    }

    /// Decreases a partition's replication factor by `count`, preferring
    /// to remove out-of-sync replicas first (spec.md §4.3.5). Reseats the
    /// preferred leader afterward to the remaining replica leading the
    /// fewest partitions overall.
    pub fn remove_replica(&mut self, partition_key: &PartitionKey, out_of_sync_ids: &[BrokerId], count: usize) -> Result<(), BalancerError> {
        let rf = self.partition(partition_key)?.replication_factor();
        if rf <= count {
            return Err(BalancerError::InvalidReplicationFactor {
                partition: partition_key.clone(),
                reason: format!("cannot remove {count} replicas; replication factor is only {rf}"),
            });
        }
        for &id in out_of_sync_ids {
            self.broker(id)?;
        }

        let mut osr: BTreeSet<BrokerId> =
            out_of_sync_ids.iter().copied().filter(|id| self.broker(*id).map(|b| b.holds(partition_key)).unwrap_or(false)).collect();

        let group_ids: Vec<GroupId> = self.groups().map(|g| g.id).collect();

        for _ in 0..count {
            let non_empty_groups: Vec<GroupId> =
                group_ids.iter().copied().filter(|g| self.group_replica_count(*g, partition_key).unwrap_or(0) > 0).collect();
            let groups_with_osr: Vec<GroupId> = non_empty_groups
                .iter()
                .copied()
                .filter(|g| self.group(*g).map(|g| g.broker_ids().any(|b| osr.contains(b))).unwrap_or(false))
                .collect();

            let candidates = if groups_with_osr.is_empty() { non_empty_groups } else { groups_with_osr };
            let total_replicas: usize = candidates.iter().map(|g| self.group_replica_count(*g, partition_key).unwrap_or(0)).sum();
            let (opt_replica_cnt, _) = compute_optimum(candidates.len(), total_replicas);
            let over_replicated: Vec<GroupId> =
                candidates.iter().copied().filter(|g| self.group_replica_count(*g, partition_key).unwrap_or(0) > opt_replica_cnt).collect();
            let mut final_candidates = if over_replicated.is_empty() { candidates } else { over_replicated };
            final_candidates.sort();

            let chosen = final_candidates
                .iter()
                .copied()
                .max_by_key(|g| self.group_partitions(*g).map(|p| p.len()).unwrap_or(0))
                .expect("count < replication factor guarantees at least one candidate group");

            let group_brokers: Vec<BrokerId> =
                self.group(chosen)?.broker_ids().copied().filter(|b| self.broker(*b).map(|b| b.holds(partition_key)).unwrap_or(false)).collect();
            let osr_in_group: Vec<BrokerId> = group_brokers.iter().copied().filter(|b| osr.contains(b)).collect();

            let victim = if let Some(&b) = osr_in_group.iter().min() {
                b
            } else {
                group_brokers
                    .iter()
                    .copied()
                    .max_by_key(|b| (self.broker(*b).map(|b| b.partition_count()).unwrap_or(0), *b))
                    .expect("chosen group holds this partition: at least one broker to remove from")
            };

            self.remove_replica_from_list(partition_key, victim)?;
            tracing::debug!(%partition_key, broker_id = victim.0, group_id = chosen.0, "removed replica");
            osr.remove(&victim);
        }

        let remaining: Vec<BrokerId> = self.partition(partition_key)?.replicas().to_vec();
        let new_leader = remaining
            .iter()
            .copied()
            .min_by_key(|b| (self.broker(*b).map(|b| b.leader_count()).unwrap_or(0), *b))
            .expect("remove_replica never empties a partition's replica list");
        self.swap_leader(partition_key, new_leader)?;
        Ok(())
    }

    /// Leadership rebalance (spec.md §4.3.3): pull phase fills under
    /// brokers first, push phase then drains over brokers. Both phases use
    /// a bounded DFS over the leader/follower graph; a `max_changes`
    /// budget, if set, caps the total number of leader swaps emitted.
    fn rebalance_leaders(&mut self, max_changes: Option<usize>) -> Result<(), BalancerError> {
        if self.broker_count() == 0 || self.partition_count() == 0 {
            return Ok(());
        }
        let (opt, _) = compute_optimum(self.broker_count(), self.partition_count());
        let mut budget = max_changes;

        let under_brokers: Vec<BrokerId> =
            self.brokers().filter(|b| b.leader_count() < opt).map(|b| b.id).collect();
        for u in under_brokers {
            loop {
                if budget_exhausted(&budget) {
                    return Ok(());
                }
                if self.broker(u)?.leader_count() >= opt {
                    break;
                }
                let mut visited = BTreeSet::new();
                let mut used_partitions = BTreeSet::new();
                visited.insert(u);
                match self.try_pull(u, opt, &mut visited, &mut used_partitions)? {
                    true => consume_budget(&mut budget),
                    false => break,
                }
            }
        }

        let over_brokers: Vec<BrokerId> =
            self.brokers().filter(|b| b.leader_count() > opt + 1).map(|b| b.id).collect();
        for o in over_brokers {
            loop {
                if budget_exhausted(&budget) {
                    return Ok(());
                }
                if self.broker(o)?.leader_count() <= opt + 1 {
                    break;
                }
                let mut visited = BTreeSet::new();
                let mut used_partitions = BTreeSet::new();
                visited.insert(o);
                match self.try_push(o, opt, &mut visited, &mut used_partitions)? {
                    true => consume_budget(&mut budget),
                    false => break,
                }
            }
        }
        Ok(())
    }

    /// Tries to give broker `u` one more preferred-leadership, possibly by
    /// recursing through the donor's own deficit first so the donor never
    /// drops below `opt` (spec.md §4.3.3 Pull).
    fn try_pull(
        &mut self,
        u: BrokerId,
        opt: usize,
        visited: &mut BTreeSet<BrokerId>,
        used_partitions: &mut BTreeSet<PartitionKey>,
    ) -> Result<bool, BalancerError> {
        let mut candidates: Vec<PartitionKey> = self
            .broker(u)?
            .partitions()
            .filter(|p| !used_partitions.contains(*p) && !self.broker(u).map(|b| b.is_leader_of(p)).unwrap_or(false))
            .cloned()
            .collect();
        candidates.sort();

        for partition in candidates {
            let donor = self.partition(&partition)?.leader();
            if visited.contains(&donor) {
                continue;
            }
            visited.insert(donor);

            let donor_count_after = self.broker(donor)?.leader_count().saturating_sub(1);
            if donor_count_after >= opt {
                used_partitions.insert(partition.clone());
                self.swap_leader(&partition, u)?;
                return Ok(true);
            }

            used_partitions.insert(partition.clone());
            if self.try_pull(donor, opt, visited, used_partitions)? {
                self.swap_leader(&partition, u)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Tries to donate one of `o`'s preferred-leaderships to an under
    /// follower, possibly recursing through a balanced follower so it can
    /// offload further down the chain first (spec.md §4.3.3 Push).
    fn try_push(
        &mut self,
        o: BrokerId,
        opt: usize,
        visited: &mut BTreeSet<BrokerId>,
        used_partitions: &mut BTreeSet<PartitionKey>,
    ) -> Result<bool, BalancerError> {
        let mut candidates: Vec<(PartitionKey, BrokerId)> = Vec::new();
        for partition in self.broker(o)?.leader_partitions().cloned().collect::<Vec<_>>() {
            if used_partitions.contains(&partition) {
                continue;
            }
            for &follower in self.partition(&partition)?.replicas() {
                if follower != o {
                    candidates.push((partition.clone(), follower));
                }
            }
        }
        candidates.sort();

        for (partition, follower) in candidates {
            if visited.contains(&follower) {
                continue;
            }
            visited.insert(follower);

            if self.broker(follower)?.leader_count() < opt {
                used_partitions.insert(partition.clone());
                self.swap_leader(&partition, follower)?;
                return Ok(true);
            }

            used_partitions.insert(partition.clone());
            if self.try_push(follower, opt, visited, used_partitions)? {
                self.swap_leader(&partition, follower)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
