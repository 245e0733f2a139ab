//! Entity identifiers and the cluster placement snapshot.
//!
//! The snapshot is a read-only point-in-time view of where replicas live.
//! Both the health aggregator and the safety checker consume it; neither
//! mutates it. The runtime that owns entity lifecycles produces it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of a cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service partition identifier (GUID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub Uuid);

impl PartitionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica identifier, unique within a partition.
pub type ReplicaId = i64;

/// Identifies any entity in the health hierarchy.
///
/// The hierarchy forms a tree rooted at `Cluster`:
/// Cluster → Nodes, Cluster → Applications → Services → Partitions → Replicas.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Cluster,
    Node(NodeName),
    Application(String),
    Service(String),
    Partition(PartitionId),
    Replica(PartitionId, ReplicaId),
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Cluster => write!(f, "cluster"),
            EntityId::Node(name) => write!(f, "node/{}", name),
            EntityId::Application(name) => write!(f, "application/{}", name),
            EntityId::Service(name) => write!(f, "service/{}", name),
            EntityId::Partition(id) => write!(f, "partition/{}", id),
            EntityId::Replica(pid, rid) => write!(f, "replica/{}/{}", pid, rid),
        }
    }
}

/// Lifecycle status of a node as seen by the placement runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Up,
    Down,
    Disabling,
    Disabled,
}

/// A node entry in the placement snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: NodeName,

    /// Node type name, used by per-type health policy overrides.
    pub node_type: String,

    /// Upgrade domain this node belongs to.
    pub upgrade_domain: String,

    /// Seed nodes form the cluster's bootstrap quorum.
    pub is_seed: bool,

    pub status: NodeStatus,
}

/// Role of a stateful replica within its partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    Primary,
    ActiveSecondary,
    IdleSecondary,
    None,
}

/// Build/readiness status of a replica or stateless instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    InBuild,
    Standby,
    Ready,
    Down,
    Dropped,
}

/// A replica (or stateless instance) in the placement snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaInfo {
    pub id: ReplicaId,
    pub node: NodeName,
    pub role: ReplicaRole,
    pub status: ReplicaStatus,
}

/// Kind of reconfiguration a partition is currently undergoing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconfigurationKind {
    /// Primary is being swapped to another replica.
    SwapPrimary,
    /// Primary failed over; a new primary is being established.
    Failover,
    /// Any other replica-set reconfiguration.
    Other,
}

/// A service partition in the placement snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub id: PartitionId,

    /// Configured replica set size for a stateful partition, or instance
    /// count for a stateless one.
    pub target_replica_set_size: usize,

    pub min_replica_set_size: usize,

    /// Present while the partition's replica set is being reconfigured.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reconfiguration: Option<ReconfigurationKind>,

    pub replicas: Vec<ReplicaInfo>,
}

impl PartitionInfo {
    /// Replicas currently hosted on `node`, regardless of status.
    pub fn replicas_on<'a>(
        &'a self,
        node: &'a NodeName,
    ) -> impl Iterator<Item = &'a ReplicaInfo> + 'a {
        self.replicas.iter().filter(move |r| &r.node == node)
    }

    /// Count of Ready replicas participating in the write quorum
    /// (Primary + ActiveSecondary).
    pub fn up_voting_replicas(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| {
                r.status == ReplicaStatus::Ready
                    && matches!(r.role, ReplicaRole::Primary | ReplicaRole::ActiveSecondary)
            })
            .count()
    }

    /// Write quorum for the configured replica set.
    pub fn write_quorum(&self) -> usize {
        self.target_replica_set_size / 2 + 1
    }
}

/// Whether a service keeps state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    Stateful,
    Stateless,
}

/// A service in the placement snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,

    /// Service type name, used by per-type health policy overrides.
    pub service_type: String,

    pub kind: ServiceKind,
    pub partitions: Vec<PartitionInfo>,
}

/// An application in the placement snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub name: String,

    /// Application type name, used by per-type health policy overrides.
    pub application_type: String,

    pub services: Vec<ServiceInfo>,
}

/// Point-in-time view of the whole cluster's placement.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeInfo>,
    pub applications: Vec<ApplicationInfo>,
}

impl ClusterSnapshot {
    /// Look up a node by name.
    pub fn node(&self, name: &NodeName) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| &n.name == name)
    }

    /// All nodes belonging to an upgrade domain.
    pub fn nodes_in_domain(&self, domain: &str) -> Vec<&NodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.upgrade_domain == domain)
            .collect()
    }

    /// Upgrade domain names in first-appearance order.
    pub fn upgrade_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !domains.contains(&node.upgrade_domain) {
                domains.push(node.upgrade_domain.clone());
            }
        }
        domains
    }

    /// Total number of seed nodes (regardless of status).
    pub fn seed_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_seed).count()
    }

    /// Number of seed nodes currently Up.
    pub fn up_seed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_seed && n.status == NodeStatus::Up)
            .count()
    }

    /// Iterate all partitions together with their owning service.
    pub fn partitions(&self) -> impl Iterator<Item = (&ServiceInfo, &PartitionInfo)> {
        self.applications
            .iter()
            .flat_map(|app| app.services.iter())
            .flat_map(|svc| svc.partitions.iter().map(move |p| (svc, p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, domain: &str, seed: bool) -> NodeInfo {
        NodeInfo {
            name: NodeName::new(name),
            node_type: "default".to_string(),
            upgrade_domain: domain.to_string(),
            is_seed: seed,
            status: NodeStatus::Up,
        }
    }

    #[test]
    fn test_upgrade_domains_in_discovery_order() {
        let snapshot = ClusterSnapshot {
            nodes: vec![
                node("n1", "UD2", false),
                node("n2", "UD0", false),
                node("n3", "UD2", false),
                node("n4", "UD1", false),
            ],
            applications: vec![],
        };
        assert_eq!(snapshot.upgrade_domains(), vec!["UD2", "UD0", "UD1"]);
    }

    #[test]
    fn test_seed_counting() {
        let mut snapshot = ClusterSnapshot {
            nodes: vec![node("n1", "UD0", true), node("n2", "UD1", true)],
            applications: vec![],
        };
        snapshot.nodes[1].status = NodeStatus::Down;
        assert_eq!(snapshot.seed_count(), 2);
        assert_eq!(snapshot.up_seed_count(), 1);
    }

    #[test]
    fn test_replicas_on_filters_by_node() {
        let partition = PartitionInfo {
            id: PartitionId::new_random(),
            target_replica_set_size: 3,
            min_replica_set_size: 2,
            reconfiguration: None,
            replicas: vec![
                ReplicaInfo {
                    id: 1,
                    node: NodeName::new("n1"),
                    role: ReplicaRole::Primary,
                    status: ReplicaStatus::Ready,
                },
                ReplicaInfo {
                    id: 2,
                    node: NodeName::new("n2"),
                    role: ReplicaRole::ActiveSecondary,
                    status: ReplicaStatus::Ready,
                },
                ReplicaInfo {
                    id: 3,
                    node: NodeName::new("n1"),
                    role: ReplicaRole::IdleSecondary,
                    status: ReplicaStatus::Down,
                },
            ],
        };
        let hosted: Vec<i64> = partition
            .replicas_on(&NodeName::new("n1"))
            .map(|r| r.id)
            .collect();
        assert_eq!(hosted, vec![1, 3]);
        assert_eq!(partition.replicas_on(&NodeName::new("n3")).count(), 0);
    }

    #[test]
    fn test_write_quorum() {
        let partition = PartitionInfo {
            id: PartitionId::new_random(),
            target_replica_set_size: 5,
            min_replica_set_size: 3,
            reconfiguration: None,
            replicas: vec![],
        };
        assert_eq!(partition.write_quorum(), 3);
    }
}
