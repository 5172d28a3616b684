//! Cluster rebalancing planner core.
//!
//! Given a [`topology::ClusterTopology`] snapshot, this crate computes a
//! new replica assignment that improves balance along three axes —
//! replica distribution across replication groups, partition distribution
//! across brokers within a group, and preferred-leader distribution across
//! brokers — while honoring placement constraints. It also supports
//! decommissioning brokers and changing a partition's replication factor.
//!
//! The planner is a pure, synchronous, in-memory transform: it never talks
//! to a coordinator, moves data, or estimates transfer cost. Constructing
//! a topology from external cluster metadata and executing the resulting
//! [`plan::ReassignmentPlan`] are both the embedding host's job.
//!
//! Dependency order (leaves first): [`util`] -> [`topology`] ->
//! [`group_balancer`] -> [`cluster_balancer`].

pub mod cluster_balancer;
pub mod error;
pub mod group_balancer;
pub mod plan;
pub mod topology;
pub mod util;

pub use cluster_balancer::RebalanceOptions;
pub use error::BalancerError;
pub use plan::{PartitionReassignment, ReassignmentPlan};
pub use topology::{BrokerId, BrokerSpec, ClusterTopology, GroupId, PartitionKey, PartitionSpec};
