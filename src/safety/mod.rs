//! Node safety checks.
//!
//! Preconditions verifying that taking a node down for upgrade will not
//! cause quorum or availability loss. Pure functions over the placement
//! snapshot; re-evaluated on every orchestrator tick because placement
//! changes concurrently with the upgrade.

pub mod checker;

pub use checker::{check_node, check_upgrade_domain, SafetyCheckKind};
