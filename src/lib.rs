//! Cluster health aggregation and rolling-upgrade orchestration.
//!
//! Two cooperating subsystems: a health store with hierarchical policy-based
//! aggregation (cluster → applications → services → partitions → replicas,
//! plus nodes), and a tick-driven orchestrator that walks upgrade domains
//! under safety checks, health gates, and elapsed-time budgets.

pub mod clock;
pub mod health;
pub mod model;
pub mod safety;
pub mod upgrade;

pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{
    evaluate_application, evaluate_cluster, ApplicationHealthPolicy, ClusterHealthPolicy,
    ClusterUpgradeHealthPolicy, HealthEvaluation, HealthEvent, HealthState, HealthStore,
    HealthVerdict,
};
pub use model::{ClusterSnapshot, EntityId, NodeInfo, NodeName};
pub use upgrade::{
    FailureAction, FailureReason, MonitoringPolicy, RollingUpgradeMode, UpgradeDescription,
    UpgradeEvent, UpgradeOrchestrator, UpgradeProgress, UpgradeRuntime, UpgradeState,
    UpgradeTarget,
};
