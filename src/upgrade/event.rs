//! Upgrade events emitted by the runtime's broadcast bus.

use crate::upgrade::policy::FailureReason;
use serde::{Deserialize, Serialize};

/// Events observers receive while an upgrade runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeEvent {
    /// The upgrade left Pending and entered its first domain.
    UpgradeStarted {
        target_version: String,
    },

    /// A domain's node actions were handed to the driver.
    DomainUpgradeStarted {
        domain: String,
    },

    /// A domain finished its health gate (or, unmonitored, its node actions).
    DomainUpgradeCompleted {
        domain: String,
    },

    /// A monitored health evaluation came back clear.
    HealthCheckPassed {
        domain: String,
    },

    /// A monitored health evaluation found violations.
    HealthCheckFailed {
        domain: String,
        description: String,
    },

    /// The failure action fired and the upgrade is unwinding.
    RollbackStarted {
        reason: FailureReason,
    },

    /// Terminal: every domain rolled forward.
    UpgradeCompleted,

    /// Terminal: rollback finished.
    RollbackCompleted,

    /// Terminal: failureAction=Manual halted the upgrade.
    UpgradeFailed {
        reason: FailureReason,
        details: String,
    },
}
