//! Unhealthy-evaluation tree.
//!
//! Every Error/Warning contributor to an aggregated verdict is recorded as a
//! node in this tree so callers can reconstruct *why* a rollup came out the
//! way it did. The tree is a closed tagged union keyed by `kind` on the wire.

use crate::health::event::{HealthEventView, HealthState};
use crate::model::PartitionId;
use serde::{Deserialize, Serialize};

/// One node in the unhealthy-evaluation tree.
///
/// Collection variants carry the counters the verdict was computed from;
/// wrapper variants identify the unhealthy member; `Event` is a leaf holding
/// the offending report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum HealthEvaluation {
    /// A single unhealthy health event on an entity.
    Event {
        aggregated_health_state: HealthState,
        description: String,
        consider_warning_as_error: bool,
        unhealthy_event: HealthEventView,
    },

    /// An unhealthy replica, wrapping its event evaluations.
    Replica {
        aggregated_health_state: HealthState,
        partition_id: PartitionId,
        replica_id: i64,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// An unhealthy partition.
    Partition {
        aggregated_health_state: HealthState,
        partition_id: PartitionId,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// An unhealthy service.
    Service {
        aggregated_health_state: HealthState,
        service_name: String,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// An unhealthy application.
    Application {
        aggregated_health_state: HealthState,
        application_name: String,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// An unhealthy node.
    Node {
        aggregated_health_state: HealthState,
        node_name: String,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Replicas of a partition vs maxPercentUnhealthyReplicasPerPartition.
    Replicas {
        aggregated_health_state: HealthState,
        description: String,
        max_percent_unhealthy_replicas_per_partition: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Partitions of a service vs maxPercentUnhealthyPartitionsPerService.
    Partitions {
        aggregated_health_state: HealthState,
        description: String,
        max_percent_unhealthy_partitions_per_service: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Services of one type vs maxPercentUnhealthyServices.
    Services {
        aggregated_health_state: HealthState,
        description: String,
        service_type_name: String,
        max_percent_unhealthy_services: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Applications in the global bucket vs maxPercentUnhealthyApplications.
    Applications {
        aggregated_health_state: HealthState,
        description: String,
        max_percent_unhealthy_applications: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Applications of one type, evaluated in an isolated override bucket.
    ApplicationTypeApplications {
        aggregated_health_state: HealthState,
        description: String,
        application_type_name: String,
        max_percent_unhealthy_applications: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Nodes in the global bucket vs maxPercentUnhealthyNodes.
    Nodes {
        aggregated_health_state: HealthState,
        description: String,
        max_percent_unhealthy_nodes: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Nodes of one type, evaluated in an isolated override bucket.
    NodeTypeNodes {
        aggregated_health_state: HealthState,
        description: String,
        node_type_name: String,
        max_percent_unhealthy_nodes: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Nodes of the upgrade domain currently being upgraded.
    UpgradeDomainNodes {
        aggregated_health_state: HealthState,
        description: String,
        upgrade_domain_name: String,
        max_percent_unhealthy_nodes: u16,
        total_count: usize,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Global degradation vs the pre-upgrade baseline.
    DeltaNodesCheck {
        aggregated_health_state: HealthState,
        description: String,
        baseline_error_count: usize,
        baseline_total_count: usize,
        current_error_count: usize,
        total_count: usize,
        max_percent_delta_unhealthy_nodes: u16,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },

    /// Per-upgrade-domain degradation vs the pre-upgrade baseline.
    UpgradeDomainDeltaNodesCheck {
        aggregated_health_state: HealthState,
        description: String,
        upgrade_domain_name: String,
        baseline_error_count: usize,
        baseline_total_count: usize,
        current_error_count: usize,
        total_count: usize,
        max_percent_upgrade_domain_delta_unhealthy_nodes: u16,
        unhealthy_evaluations: Vec<HealthEvaluation>,
    },
}

impl HealthEvaluation {
    /// The verdict this tree node contributed.
    pub fn aggregated_health_state(&self) -> HealthState {
        match self {
            HealthEvaluation::Event { aggregated_health_state, .. }
            | HealthEvaluation::Replica { aggregated_health_state, .. }
            | HealthEvaluation::Partition { aggregated_health_state, .. }
            | HealthEvaluation::Service { aggregated_health_state, .. }
            | HealthEvaluation::Application { aggregated_health_state, .. }
            | HealthEvaluation::Node { aggregated_health_state, .. }
            | HealthEvaluation::Replicas { aggregated_health_state, .. }
            | HealthEvaluation::Partitions { aggregated_health_state, .. }
            | HealthEvaluation::Services { aggregated_health_state, .. }
            | HealthEvaluation::Applications { aggregated_health_state, .. }
            | HealthEvaluation::ApplicationTypeApplications { aggregated_health_state, .. }
            | HealthEvaluation::Nodes { aggregated_health_state, .. }
            | HealthEvaluation::NodeTypeNodes { aggregated_health_state, .. }
            | HealthEvaluation::UpgradeDomainNodes { aggregated_health_state, .. }
            | HealthEvaluation::DeltaNodesCheck { aggregated_health_state, .. }
            | HealthEvaluation::UpgradeDomainDeltaNodesCheck { aggregated_health_state, .. } => {
                *aggregated_health_state
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_kind_discriminator_on_the_wire() {
        let evaluation = HealthEvaluation::Nodes {
            aggregated_health_state: HealthState::Error,
            description: "3 of 20 nodes unhealthy, tolerated 2".to_string(),
            max_percent_unhealthy_nodes: 10,
            total_count: 20,
            unhealthy_evaluations: vec![],
        };
        let json = serde_json::to_value(&evaluation).unwrap();
        assert_eq!(json["kind"], "Nodes");
        assert_eq!(json["totalCount"], 20);

        let back: HealthEvaluation = serde_json::from_value(json).unwrap();
        assert_eq!(back, evaluation);
    }

    #[test]
    fn test_event_leaf_round_trip() {
        let evaluation = HealthEvaluation::Event {
            aggregated_health_state: HealthState::Error,
            description: "watchdog reported Error on Disk".to_string(),
            consider_warning_as_error: true,
            unhealthy_event: HealthEventView {
                event: crate::health::event::HealthEvent {
                    source_id: "watchdog".to_string(),
                    property: "Disk".to_string(),
                    health_state: HealthState::Warning,
                    sequence_number: 4,
                    time_to_live_in_milliseconds: Some(60_000),
                    description: "disk 91% full".to_string(),
                    remove_when_expired: false,
                    source_utc_timestamp: Utc::now(),
                },
                stale: false,
            },
        };
        let json = serde_json::to_string(&evaluation).unwrap();
        let back: HealthEvaluation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, evaluation);
    }
}
