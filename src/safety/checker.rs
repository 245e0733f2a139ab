//! Per-node safety check evaluation.

use crate::model::{
    ClusterSnapshot, NodeName, NodeStatus, ReconfigurationKind, ReplicaRole, ReplicaStatus,
    ServiceKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A reason a node cannot safely be taken down right now.
///
/// The `WaitFor*` kinds are transient (a replica in flight) and may be
/// overridden after the replica-set check timeout; the `Ensure*` kinds block
/// until placement actually changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SafetyCheckKind {
    EnsureSeedNodeQuorum,
    EnsurePartitionQuorum,
    WaitForPrimaryPlacement,
    WaitForPrimarySwap,
    WaitForReconfiguration,
    WaitForInbuildReplica,
    EnsureAvailability,
}

impl SafetyCheckKind {
    /// Whether the replica-set check timeout may override this block.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            SafetyCheckKind::WaitForPrimaryPlacement
                | SafetyCheckKind::WaitForPrimarySwap
                | SafetyCheckKind::WaitForReconfiguration
                | SafetyCheckKind::WaitForInbuildReplica
        )
    }
}

/// Evaluate all safety checks for taking `node` down.
///
/// Empty result means the node is safe to deactivate. Each check is
/// independent; any non-empty result blocks.
pub fn check_node(cluster: &ClusterSnapshot, node: &NodeName) -> BTreeSet<SafetyCheckKind> {
    let mut blocks = BTreeSet::new();

    // Seed quorum: removing a live seed must keep up-seeds above half.
    if let Some(info) = cluster.node(node) {
        if info.is_seed && info.status == NodeStatus::Up {
            let seeds = cluster.seed_count();
            let up_after = cluster.up_seed_count() - 1;
            if up_after * 2 <= seeds {
                blocks.insert(SafetyCheckKind::EnsureSeedNodeQuorum);
            }
        }
    }

    for (service, partition) in cluster.partitions() {
        let hosted: Vec<_> = partition.replicas_on(node).collect();
        if hosted.is_empty() {
            continue;
        }

        match service.kind {
            ServiceKind::Stateless => {
                let up_instances = partition
                    .replicas
                    .iter()
                    .filter(|r| r.status == ReplicaStatus::Ready)
                    .count();
                let up_here = hosted
                    .iter()
                    .filter(|r| r.status == ReplicaStatus::Ready)
                    .count();
                if up_here > 0 && up_instances == up_here {
                    blocks.insert(SafetyCheckKind::EnsureAvailability);
                }
            }
            ServiceKind::Stateful => {
                let hosts_primary = hosted.iter().any(|r| r.role == ReplicaRole::Primary);
                let voting = partition.up_voting_replicas();
                let quorum = partition.write_quorum();

                // Transient replica states on this node.
                if hosted.iter().any(|r| r.status == ReplicaStatus::InBuild) {
                    blocks.insert(SafetyCheckKind::WaitForInbuildReplica);
                }
                match partition.reconfiguration {
                    Some(ReconfigurationKind::SwapPrimary) if hosts_primary => {
                        blocks.insert(SafetyCheckKind::WaitForPrimarySwap);
                    }
                    Some(_) => {
                        blocks.insert(SafetyCheckKind::WaitForReconfiguration);
                    }
                    None => {}
                }

                // Partition has no Up primary anywhere: the node's replica may
                // be the one elected once placement settles.
                let has_up_primary = partition
                    .replicas
                    .iter()
                    .any(|r| r.role == ReplicaRole::Primary && r.status == ReplicaStatus::Ready);
                if !has_up_primary {
                    blocks.insert(SafetyCheckKind::WaitForPrimaryPlacement);
                }

                // Would losing this node's voting replicas break write quorum?
                let voting_here = hosted
                    .iter()
                    .filter(|r| {
                        r.status == ReplicaStatus::Ready
                            && matches!(
                                r.role,
                                ReplicaRole::Primary | ReplicaRole::ActiveSecondary
                            )
                    })
                    .count();
                if voting_here > 0 && voting - voting_here < quorum {
                    blocks.insert(SafetyCheckKind::EnsurePartitionQuorum);
                }

                // Primary of a partition already at or below quorum.
                if hosts_primary && voting <= quorum {
                    blocks.insert(SafetyCheckKind::EnsureAvailability);
                }
            }
        }
    }

    blocks
}

/// Evaluate safety checks for every node of an upgrade domain.
///
/// Nodes with an empty set are omitted.
pub fn check_upgrade_domain(
    cluster: &ClusterSnapshot,
    domain: &str,
) -> BTreeMap<NodeName, BTreeSet<SafetyCheckKind>> {
    let mut result = BTreeMap::new();
    for node in cluster.nodes_in_domain(domain) {
        let blocks = check_node(cluster, &node.name);
        if !blocks.is_empty() {
            result.insert(node.name.clone(), blocks);
        }
    }
    result
}
