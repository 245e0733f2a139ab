//! Rolling-upgrade orchestration.
//!
//! This module drives monitored rolling upgrades across upgrade domains:
//! safety checks before touching a domain, health gating after, and a
//! reverse-order rollback when the policy's failure action fires.

pub mod domain;
pub mod event;
pub mod orchestrator;
pub mod policy;
pub mod runtime;

pub use domain::{sort_upgrade_domains, SortOrder, UpgradeDomainProgress, UpgradeDomainState};
pub use event::UpgradeEvent;
pub use orchestrator::{
    TickOutcome, UpgradeAction, UpgradeOrchestrator, UpgradeProgress, UpgradeState,
};
pub use policy::{
    FailureAction, FailureReason, MonitoringPolicy, RollingUpgradeMode, UpgradeDescription,
    UpgradeTarget, ValidationError,
};
pub use runtime::{SnapshotSource, UpgradeRuntime, UpgradeRuntimeConfig, UpgradeRuntimeError};
