//! Upgrade descriptions and monitoring policy.
//!
//! Duration fields on the wire accept either an ISO-8601 duration string
//! (tried first) or a decimal count of milliseconds. Zero or omitted fields
//! map to crate defaults; nothing waits unbounded.

use crate::health::policy::{
    ApplicationHealthPolicy, ClusterHealthPolicy, ClusterUpgradeHealthPolicy, PolicyError,
};
use crate::upgrade::domain::SortOrder;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Sentinel and upper bound for upgradeReplicaSetCheckTimeoutInSeconds:
/// "unbounded", and the default when unspecified.
pub const REPLICA_SET_CHECK_TIMEOUT_UNBOUNDED_SECS: u64 = 42_949_672_925;

/// Defaults substituted for zero/omitted monitoring durations.
pub const DEFAULT_HEALTH_CHECK_WAIT_MS: u64 = 0;
pub const DEFAULT_HEALTH_CHECK_STABLE_MS: u64 = 120_000;
pub const DEFAULT_HEALTH_CHECK_RETRY_MS: u64 = 600_000;
pub const DEFAULT_UPGRADE_DOMAIN_TIMEOUT_MS: u64 = 3_600_000;
pub const DEFAULT_UPGRADE_TIMEOUT_MS: u64 = 43_200_000;

/// How the rolling upgrade walks the domains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollingUpgradeMode {
    /// Advance automatically with no health gating.
    #[default]
    UnmonitoredAuto,
    /// Hold after each domain for an explicit operator approval.
    UnmonitoredManual,
    /// Gate each domain on health policy and safety checks.
    Monitored,
}

/// Compensating behavior when a monitored upgrade violates its policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureAction {
    Rollback,
    Manual,
}

/// Why an upgrade attempt ended. Wire-verbatim values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[default]
    None,
    Interrupted,
    HealthCheck,
    UpgradeDomainTimeout,
    OverallUpgradeTimeout,
}

/// Parse an ISO-8601 duration (`PnDTnHnMnS`, `PnW`) into milliseconds.
fn parse_iso8601_duration_ms(text: &str) -> Option<u64> {
    let rest = text.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    // Weeks form is exclusive: PnW.
    if let Some(weeks) = rest.strip_suffix('W') {
        let w: u64 = weeks.parse().ok()?;
        return Some(w * 7 * 24 * 3_600_000);
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total_ms = 0u64;
    let mut parse_components = |part: &str, units: &[(char, u64)]| -> Option<()> {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
            } else {
                let (_, ms_per_unit) = units.iter().find(|(u, _)| *u == c)?;
                let value: f64 = number.parse().ok()?;
                total_ms += (value * *ms_per_unit as f64) as u64;
                number.clear();
            }
        }
        if number.is_empty() {
            Some(())
        } else {
            None
        }
    };

    parse_components(date_part, &[('D', 24 * 3_600_000)])?;
    parse_components(
        time_part,
        &[('H', 3_600_000), ('M', 60_000), ('S', 1_000)],
    )?;
    Some(total_ms)
}

/// Accept a duration as an ISO-8601 string (tried first) or a decimal count
/// of milliseconds.
fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(f64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) if ms >= 0.0 => Ok(Some(ms as u64)),
        Some(Raw::Millis(ms)) => Err(serde::de::Error::custom(format!(
            "negative duration: {}",
            ms
        ))),
        Some(Raw::Text(text)) => parse_iso8601_duration_ms(&text)
            .or_else(|| text.parse::<f64>().ok().filter(|ms| *ms >= 0.0).map(|ms| ms as u64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("malformed duration '{}'", text))),
    }
}

/// Elapsed-time budgets gating a monitored upgrade.
///
/// All budgets restart at domain entry; none is a wall-clock deadline
/// computed once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringPolicy {
    /// Defaults to Rollback when a Monitored upgrade leaves it unspecified.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_action: Option<FailureAction>,

    #[serde(default, deserialize_with = "deserialize_duration_ms")]
    pub health_check_wait_duration_in_milliseconds: Option<u64>,

    #[serde(default, deserialize_with = "deserialize_duration_ms")]
    pub health_check_stable_duration_in_milliseconds: Option<u64>,

    #[serde(default, deserialize_with = "deserialize_duration_ms")]
    pub health_check_retry_timeout_in_milliseconds: Option<u64>,

    #[serde(default, deserialize_with = "deserialize_duration_ms")]
    pub upgrade_timeout_in_milliseconds: Option<u64>,

    #[serde(default, deserialize_with = "deserialize_duration_ms")]
    pub upgrade_domain_timeout_in_milliseconds: Option<u64>,
}

/// Substitute the default when a budget is omitted. Zero stays zero only for
/// the wait duration (skip the wait); zero timeouts fall back to defaults so
/// no wait is ever unbounded.
fn budget(value: Option<u64>, default_ms: u64) -> Duration {
    match value {
        Some(0) | None => Duration::from_millis(default_ms),
        Some(ms) => Duration::from_millis(ms),
    }
}

impl MonitoringPolicy {
    pub fn failure_action(&self) -> FailureAction {
        self.failure_action.unwrap_or(FailureAction::Rollback)
    }

    pub fn health_check_wait(&self) -> Duration {
        // Zero is meaningful here: evaluate immediately.
        Duration::from_millis(
            self.health_check_wait_duration_in_milliseconds
                .unwrap_or(DEFAULT_HEALTH_CHECK_WAIT_MS),
        )
    }

    pub fn health_check_stable(&self) -> Duration {
        budget(
            self.health_check_stable_duration_in_milliseconds,
            DEFAULT_HEALTH_CHECK_STABLE_MS,
        )
    }

    pub fn health_check_retry(&self) -> Duration {
        budget(
            self.health_check_retry_timeout_in_milliseconds,
            DEFAULT_HEALTH_CHECK_RETRY_MS,
        )
    }

    pub fn upgrade_timeout(&self) -> Duration {
        budget(
            self.upgrade_timeout_in_milliseconds,
            DEFAULT_UPGRADE_TIMEOUT_MS,
        )
    }

    pub fn upgrade_domain_timeout(&self) -> Duration {
        budget(
            self.upgrade_domain_timeout_in_milliseconds,
            DEFAULT_UPGRADE_DOMAIN_TIMEOUT_MS,
        )
    }
}

/// What is being upgraded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeTarget {
    Cluster,
    Application(String),
}

impl std::fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeTarget::Cluster => write!(f, "cluster"),
            UpgradeTarget::Application(name) => write!(f, "application {}", name),
        }
    }
}

/// Validation failure for an upgrade description. Rejected before any state
/// change; never reaches the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    Policy(PolicyError),
    EmptyTargetVersion,
    ReplicaSetCheckTimeoutOutOfRange(u64),
    NoUpgradeDomains,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Policy(e) => write!(f, "invalid policy: {}", e),
            ValidationError::EmptyTargetVersion => write!(f, "targetVersion must not be empty"),
            ValidationError::ReplicaSetCheckTimeoutOutOfRange(v) => write!(
                f,
                "upgradeReplicaSetCheckTimeoutInSeconds {} outside [0, {}]",
                v, REPLICA_SET_CHECK_TIMEOUT_UNBOUNDED_SECS
            ),
            ValidationError::NoUpgradeDomains => {
                write!(f, "cluster snapshot has no upgrade domains")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<PolicyError> for ValidationError {
    fn from(e: PolicyError) -> Self {
        ValidationError::Policy(e)
    }
}

fn default_replica_set_check_timeout() -> u64 {
    REPLICA_SET_CHECK_TIMEOUT_UNBOUNDED_SECS
}

/// Full description of a requested rolling upgrade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDescription {
    pub target: UpgradeTarget,
    pub current_version: String,
    pub target_version: String,

    #[serde(default)]
    pub rolling_upgrade_mode: RollingUpgradeMode,

    /// Restart hosts even when the version is unchanged.
    #[serde(default)]
    pub force_restart: bool,

    /// How long retryable safety blocks may hold a domain before the
    /// orchestrator proceeds anyway, accepting transient availability loss.
    #[serde(default = "default_replica_set_check_timeout")]
    pub upgrade_replica_set_check_timeout_in_seconds: u64,

    #[serde(default)]
    pub sort_order: SortOrder,

    #[serde(default)]
    pub monitoring_policy: MonitoringPolicy,

    #[serde(default)]
    pub health_policy: ClusterHealthPolicy,

    /// Used when the target is an application.
    #[serde(default)]
    pub application_health_policy: ApplicationHealthPolicy,

    #[serde(default)]
    pub enable_delta_health_evaluation: bool,

    #[serde(default)]
    pub upgrade_health_policy: ClusterUpgradeHealthPolicy,
}

impl UpgradeDescription {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_version.is_empty() {
            return Err(ValidationError::EmptyTargetVersion);
        }
        if self.upgrade_replica_set_check_timeout_in_seconds
            > REPLICA_SET_CHECK_TIMEOUT_UNBOUNDED_SECS
        {
            return Err(ValidationError::ReplicaSetCheckTimeoutOutOfRange(
                self.upgrade_replica_set_check_timeout_in_seconds,
            ));
        }
        self.health_policy.validate()?;
        self.application_health_policy.validate()?;
        self.upgrade_health_policy.validate()?;
        Ok(())
    }

    /// The safety-block override budget; None when unbounded.
    pub fn replica_set_check_timeout(&self) -> Option<Duration> {
        if self.upgrade_replica_set_check_timeout_in_seconds
            == REPLICA_SET_CHECK_TIMEOUT_UNBOUNDED_SECS
        {
            None
        } else {
            Some(Duration::from_secs(
                self.upgrade_replica_set_check_timeout_in_seconds,
            ))
        }
    }
}
