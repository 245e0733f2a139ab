//! Health policies: tolerance percentages and per-type overrides.
//!
//! Percentages are integers in [0,100]. Out-of-range values are a validation
//! error, never clamped. A per-type override takes members of that type out
//! of the global pool entirely; they are evaluated in an isolated bucket.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Policy validation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// A percentage field outside [0,100].
    PercentOutOfRange { field: String, value: u16 },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::PercentOutOfRange { field, value } => {
                write!(f, "{} must be in [0,100], got {}", field, value)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

fn check_percent(field: &str, value: u16) -> Result<(), PolicyError> {
    if value > 100 {
        Err(PolicyError::PercentOutOfRange {
            field: field.to_string(),
            value,
        })
    } else {
        Ok(())
    }
}

/// Tolerances for one service type within an application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTypeHealthPolicy {
    #[serde(default)]
    pub max_percent_unhealthy_services: u16,
    #[serde(default)]
    pub max_percent_unhealthy_partitions_per_service: u16,
    #[serde(default)]
    pub max_percent_unhealthy_replicas_per_partition: u16,
}

impl Default for ServiceTypeHealthPolicy {
    fn default() -> Self {
        Self {
            max_percent_unhealthy_services: 0,
            max_percent_unhealthy_partitions_per_service: 0,
            max_percent_unhealthy_replicas_per_partition: 0,
        }
    }
}

impl ServiceTypeHealthPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        check_percent("maxPercentUnhealthyServices", self.max_percent_unhealthy_services)?;
        check_percent(
            "maxPercentUnhealthyPartitionsPerService",
            self.max_percent_unhealthy_partitions_per_service,
        )?;
        check_percent(
            "maxPercentUnhealthyReplicasPerPartition",
            self.max_percent_unhealthy_replicas_per_partition,
        )?;
        Ok(())
    }
}

/// Tolerances for one application's health evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationHealthPolicy {
    #[serde(default)]
    pub consider_warning_as_error: bool,

    /// Applied to services whose type has no entry in the map.
    #[serde(default)]
    pub default_service_type_policy: ServiceTypeHealthPolicy,

    /// Service type name → isolated-bucket policy.
    #[serde(default)]
    pub service_type_health_policy_map: BTreeMap<String, ServiceTypeHealthPolicy>,
}

impl ApplicationHealthPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.default_service_type_policy.validate()?;
        for policy in self.service_type_health_policy_map.values() {
            policy.validate()?;
        }
        Ok(())
    }

    /// Policy bucket for a service type.
    pub fn for_service_type(&self, service_type: &str) -> &ServiceTypeHealthPolicy {
        self.service_type_health_policy_map
            .get(service_type)
            .unwrap_or(&self.default_service_type_policy)
    }
}

/// Tolerances for the cluster-level rollup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealthPolicy {
    #[serde(default)]
    pub consider_warning_as_error: bool,

    #[serde(default)]
    pub max_percent_unhealthy_nodes: u16,

    #[serde(default)]
    pub max_percent_unhealthy_applications: u16,

    /// Node type name → isolated-bucket maxPercentUnhealthyNodes.
    #[serde(default)]
    pub node_type_health_policy_map: BTreeMap<String, u16>,

    /// Application type name → isolated-bucket maxPercentUnhealthyApplications.
    #[serde(default)]
    pub application_type_health_policy_map: BTreeMap<String, u16>,

    /// Applied to applications with no per-type entry.
    #[serde(default)]
    pub application_health_policy: ApplicationHealthPolicy,
}

impl ClusterHealthPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        check_percent("maxPercentUnhealthyNodes", self.max_percent_unhealthy_nodes)?;
        check_percent(
            "maxPercentUnhealthyApplications",
            self.max_percent_unhealthy_applications,
        )?;
        for (name, percent) in &self.node_type_health_policy_map {
            check_percent(&format!("nodeTypeHealthPolicyMap[{}]", name), *percent)?;
        }
        for (name, percent) in &self.application_type_health_policy_map {
            check_percent(&format!("applicationTypeHealthPolicyMap[{}]", name), *percent)?;
        }
        self.application_health_policy.validate()?;
        Ok(())
    }
}

/// Delta tolerances applied during a monitored upgrade, on top of the
/// absolute cluster policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUpgradeHealthPolicy {
    /// Allowed global degradation vs the pre-upgrade baseline.
    #[serde(default)]
    pub max_percent_delta_unhealthy_nodes: u16,

    /// Allowed degradation within any single upgrade domain.
    #[serde(default)]
    pub max_percent_upgrade_domain_delta_unhealthy_nodes: u16,
}

impl Default for ClusterUpgradeHealthPolicy {
    fn default() -> Self {
        Self {
            max_percent_delta_unhealthy_nodes: 10,
            max_percent_upgrade_domain_delta_unhealthy_nodes: 15,
        }
    }
}

impl ClusterUpgradeHealthPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        check_percent(
            "maxPercentDeltaUnhealthyNodes",
            self.max_percent_delta_unhealthy_nodes,
        )?;
        check_percent(
            "maxPercentUpgradeDomainDeltaUnhealthyNodes",
            self.max_percent_upgrade_domain_delta_unhealthy_nodes,
        )?;
        Ok(())
    }
}

/// Tolerated unhealthy count under the floor rounding rule: exceeding
/// floor(percent * total / 100) by even one member flips the parent to Error.
pub fn tolerated_unhealthy(max_percent: u16, total: usize) -> usize {
    (max_percent as usize) * total / 100
}
