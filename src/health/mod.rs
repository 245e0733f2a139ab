//! Health reporting, storage, and hierarchical aggregation.

pub mod aggregator;
pub mod evaluation;
pub mod event;
pub mod policy;
pub mod store;

pub use aggregator::{
    capture_baseline, evaluate_application, evaluate_cluster, DeltaBaseline, HealthVerdict,
    UpgradeHealthContext,
};
pub use evaluation::HealthEvaluation;
pub use event::{HealthEvent, HealthEventView, HealthState};
pub use policy::{
    ApplicationHealthPolicy, ClusterHealthPolicy, ClusterUpgradeHealthPolicy, PolicyError,
    ServiceTypeHealthPolicy,
};
pub use store::{HealthSnapshot, HealthStore, HealthStoreError};
