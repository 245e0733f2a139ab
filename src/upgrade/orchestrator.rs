//! Monitored rolling-upgrade orchestration.
//!
//! A tick-driven state machine: every transition happens inside `tick`,
//! driven by elapsed time against configured budgets, the placement
//! snapshot, and the health snapshot. No sleeps, no I/O; the runtime owns
//! the loop and the driver that applies node actions.

use crate::health::aggregator::{
    capture_baseline, evaluate_application, evaluate_cluster, DeltaBaseline, UpgradeHealthContext,
};
use crate::health::event::HealthState;
use crate::health::store::HealthSnapshot;
use crate::model::ClusterSnapshot;
use crate::safety::checker::check_upgrade_domain;
use crate::upgrade::domain::{
    sort_upgrade_domains, UpgradeDomainProgress, UpgradeDomainState,
};
use crate::upgrade::event::UpgradeEvent;
use crate::upgrade::policy::{
    FailureAction, FailureReason, RollingUpgradeMode, UpgradeDescription, UpgradeTarget,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Overall state of the upgrade. Wire-verbatim values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeState {
    RollingForwardPending,
    RollingForwardInProgress,
    RollingForwardCompleted,
    RollingBackInProgress,
    RollingBackCompleted,
    Failed,
}

/// Node actions handed to the external driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeAction {
    /// Apply the target version to every node of a domain.
    ApplyDomain {
        domain: String,
        target_version: String,
        force_restart: bool,
    },

    /// Re-apply the previous version to a completed domain.
    RevertDomain {
        domain: String,
        target_version: String,
    },
}

/// Wire-visible progress of the whole upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProgress {
    pub upgrade_state: UpgradeState,
    pub current_upgrade_domain: Option<String>,
    pub upgrade_domains: Vec<UpgradeDomainProgress>,
    pub failure_reason: FailureReason,
    pub upgrade_status_details: String,
    pub health_check_retry_flips: u32,
}

/// What one tick produced: actions for the driver, events for observers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub actions: Vec<UpgradeAction>,
    pub events: Vec<UpgradeEvent>,
}

/// Where the current domain stands in its sub-state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DomainPhase {
    /// Waiting for safety checks to clear (or the replica-set check timeout).
    SafetyCheck { since: Instant },
    /// Driver is applying node actions; waiting for its completion.
    Upgrading,
    /// UnmonitoredManual: waiting for operator approval to move on.
    AwaitingApproval,
    /// Monitored: absorbing post-upgrade churn before the first evaluation.
    HealthWait { since: Instant },
    /// Monitored: healthy; must stay healthy for the stable duration.
    Stabilizing { since: Instant },
    /// Monitored: unhealthy; re-evaluating until recovery or retry timeout.
    Retrying { since: Instant },
}

/// The rolling-upgrade state machine.
pub struct UpgradeOrchestrator {
    description: UpgradeDescription,

    /// Walk order, fixed at submission.
    domains: Vec<String>,

    state: UpgradeState,
    current: usize,
    phase: DomainPhase,

    started_at: Instant,
    domain_entered_at: Instant,

    /// Domains completed during roll-forward, in completion order.
    completed: Vec<String>,

    /// Remaining domains to revert, reverse completion order.
    rollback_queue: VecDeque<String>,

    failure_reason: FailureReason,
    status_details: String,
    health_check_retry_flips: u32,

    /// Delta baseline captured when the upgrade left Pending.
    baseline: Option<DeltaBaseline>,

    /// Driver acknowledged the current domain's node actions.
    work_done: bool,

    /// Operator approved advancing past the current domain.
    approved: bool,

    /// Operator requested cancellation; honored on the next tick.
    interrupted: bool,
}

impl UpgradeOrchestrator {
    /// Validate the description and fix the domain walk order.
    pub fn new(
        description: UpgradeDescription,
        cluster: &ClusterSnapshot,
        now: Instant,
    ) -> Result<Self, ValidationError> {
        description.validate()?;
        let domains = sort_upgrade_domains(cluster.upgrade_domains(), description.sort_order);
        if domains.is_empty() {
            return Err(ValidationError::NoUpgradeDomains);
        }
        Ok(Self {
            description,
            domains,
            state: UpgradeState::RollingForwardPending,
            current: 0,
            phase: DomainPhase::SafetyCheck { since: now },
            started_at: now,
            domain_entered_at: now,
            completed: Vec::new(),
            rollback_queue: VecDeque::new(),
            failure_reason: FailureReason::None,
            status_details: String::new(),
            health_check_retry_flips: 0,
            baseline: None,
            work_done: false,
            approved: false,
            interrupted: false,
        })
    }

    pub fn state(&self) -> UpgradeState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            UpgradeState::RollingForwardCompleted
                | UpgradeState::RollingBackCompleted
                | UpgradeState::Failed
        )
    }

    /// The driver finished applying (or reverting) a domain's node actions.
    pub fn domain_work_completed(&mut self, domain: &str) {
        if self.active_domain().map(String::as_str) == Some(domain) {
            self.work_done = true;
        }
    }

    /// UnmonitoredManual: operator approves moving past the current domain.
    pub fn approve_next_domain(&mut self) {
        self.approved = true;
    }

    /// Operator-requested cancellation. Runs the same failure path as a
    /// timeout, with `FailureReason::Interrupted`, on the next tick.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    fn active_domain(&self) -> Option<&String> {
        match self.state {
            UpgradeState::RollingBackInProgress => self.rollback_queue.front(),
            UpgradeState::RollingForwardPending | UpgradeState::RollingForwardInProgress => {
                self.domains.get(self.current)
            }
            _ => None,
        }
    }

    fn monitored(&self) -> bool {
        self.description.rolling_upgrade_mode == RollingUpgradeMode::Monitored
    }

    /// Advance the state machine one step.
    pub fn tick(
        &mut self,
        now: Instant,
        cluster: &ClusterSnapshot,
        health: &HealthSnapshot,
    ) -> TickOutcome {
        let mut out = TickOutcome::default();

        if self.is_terminal() {
            return out;
        }

        if self.state == UpgradeState::RollingForwardPending {
            self.started_at = now;
            if self.description.enable_delta_health_evaluation {
                self.baseline = Some(capture_baseline(
                    cluster,
                    health,
                    &self.description.health_policy,
                ));
            }
            self.state = UpgradeState::RollingForwardInProgress;
            out.events.push(UpgradeEvent::UpgradeStarted {
                target_version: self.description.target_version.clone(),
            });
            self.enter_domain(now);
        }

        if self.interrupted && self.state == UpgradeState::RollingForwardInProgress {
            self.interrupted = false;
            self.fail(FailureReason::Interrupted, now, &mut out);
            return out;
        }

        match self.state {
            UpgradeState::RollingForwardInProgress => {
                self.tick_forward(now, cluster, health, &mut out)
            }
            UpgradeState::RollingBackInProgress => self.tick_rollback(now, cluster, &mut out),
            _ => {}
        }
        out
    }

    fn enter_domain(&mut self, now: Instant) {
        self.phase = DomainPhase::SafetyCheck { since: now };
        self.domain_entered_at = now;
        self.work_done = false;
        self.approved = false;
    }

    /// Run safety checks for the active domain. Returns true when the domain
    /// may proceed: all clear, or only retryable blocks past the
    /// replica-set check timeout.
    fn safety_clear(&mut self, since: Instant, now: Instant, cluster: &ClusterSnapshot) -> bool {
        let domain = match self.active_domain() {
            Some(d) => d.clone(),
            None => return false,
        };
        let blocked = check_upgrade_domain(cluster, &domain);
        if blocked.is_empty() {
            return true;
        }

        let all_retryable = blocked
            .values()
            .all(|kinds| kinds.iter().all(|k| k.is_retryable()));
        if all_retryable {
            if let Some(timeout) = self.description.replica_set_check_timeout() {
                if now.duration_since(since) >= timeout {
                    self.status_details = format!(
                        "replica set check timeout expired for {}; proceeding despite pending safety checks",
                        domain
                    );
                    return true;
                }
            }
        }

        self.status_details = format!(
            "waiting on safety checks in {}: {:?}",
            domain,
            blocked
                .iter()
                .map(|(node, kinds)| (node.as_str(), kinds.iter().collect::<Vec<_>>()))
                .collect::<Vec<_>>()
        );
        false
    }

    /// Whether the target's health gate currently passes (Error fails it,
    /// Warning does not).
    fn evaluate_health(&self, cluster: &ClusterSnapshot, health: &HealthSnapshot) -> (bool, String) {
        let verdict = match &self.description.target {
            UpgradeTarget::Cluster => {
                let delta_ctx;
                let ctx = match &self.baseline {
                    Some(baseline) => {
                        delta_ctx = UpgradeHealthContext {
                            baseline,
                            policy: &self.description.upgrade_health_policy,
                            current_domain: self.domains.get(self.current).map(String::as_str),
                        };
                        Some(&delta_ctx)
                    }
                    None => None,
                };
                evaluate_cluster(cluster, health, &self.description.health_policy, ctx)
            }
            UpgradeTarget::Application(name) => {
                match cluster.applications.iter().find(|a| &a.name == name) {
                    Some(app) => evaluate_application(
                        app,
                        health,
                        &self.description.application_health_policy,
                    ),
                    // The application vanished mid-upgrade; that is not healthy.
                    None => {
                        return (false, format!("application {} not found in snapshot", name))
                    }
                }
            }
        };

        let healthy = verdict.aggregated_health_state != HealthState::Error;
        let description = verdict
            .unhealthy_evaluations
            .first()
            .map(|e| format!("{:?}", e))
            .unwrap_or_default();
        (healthy, description)
    }

    fn tick_forward(
        &mut self,
        now: Instant,
        cluster: &ClusterSnapshot,
        health: &HealthSnapshot,
        out: &mut TickOutcome,
    ) {
        // Elapsed-time budgets apply only when a monitoring policy is in force.
        if self.monitored() {
            let policy = &self.description.monitoring_policy;
            if now.duration_since(self.started_at) >= policy.upgrade_timeout() {
                self.fail(FailureReason::OverallUpgradeTimeout, now, out);
                return;
            }
            if now.duration_since(self.domain_entered_at) >= policy.upgrade_domain_timeout() {
                self.fail(FailureReason::UpgradeDomainTimeout, now, out);
                return;
            }
        }

        match self.phase {
            DomainPhase::SafetyCheck { since } => {
                if self.safety_clear(since, now, cluster) {
                    self.start_apply(now, out);
                }
            }
            DomainPhase::Upgrading => {
                if self.work_done {
                    self.work_done = false;
                    self.after_apply(now, out);
                }
            }
            DomainPhase::AwaitingApproval => {
                if self.approved {
                    self.complete_domain(now, out);
                }
            }
            DomainPhase::HealthWait { since } => {
                if now.duration_since(since)
                    >= self.description.monitoring_policy.health_check_wait()
                {
                    let (healthy, description) = self.evaluate_health(cluster, health);
                    let domain = self.domains[self.current].clone();
                    if healthy {
                        self.phase = DomainPhase::Stabilizing { since: now };
                        out.events.push(UpgradeEvent::HealthCheckPassed { domain });
                    } else {
                        self.phase = DomainPhase::Retrying { since: now };
                        out.events
                            .push(UpgradeEvent::HealthCheckFailed { domain, description });
                    }
                }
            }
            DomainPhase::Stabilizing { since } => {
                let (healthy, description) = self.evaluate_health(cluster, health);
                if !healthy {
                    // Regression restarts the stable window, not the domain.
                    self.health_check_retry_flips += 1;
                    self.phase = DomainPhase::Retrying { since: now };
                    out.events.push(UpgradeEvent::HealthCheckFailed {
                        domain: self.domains[self.current].clone(),
                        description,
                    });
                } else if now.duration_since(since)
                    >= self.description.monitoring_policy.health_check_stable()
                {
                    self.complete_domain(now, out);
                }
            }
            DomainPhase::Retrying { since } => {
                let (healthy, _) = self.evaluate_health(cluster, health);
                if healthy {
                    self.health_check_retry_flips += 1;
                    self.phase = DomainPhase::Stabilizing { since: now };
                    out.events.push(UpgradeEvent::HealthCheckPassed {
                        domain: self.domains[self.current].clone(),
                    });
                } else if now.duration_since(since)
                    >= self.description.monitoring_policy.health_check_retry()
                {
                    self.fail(FailureReason::HealthCheck, now, out);
                }
            }
        }
    }

    /// A version no-op completes without driver involvement unless
    /// forceRestart demands a host restart anyway.
    fn is_noop(&self) -> bool {
        self.description.current_version == self.description.target_version
            && !self.description.force_restart
    }

    fn start_apply(&mut self, now: Instant, out: &mut TickOutcome) {
        let domain = self.domains[self.current].clone();
        if self.is_noop() {
            self.after_apply(now, out);
            return;
        }
        out.actions.push(UpgradeAction::ApplyDomain {
            domain: domain.clone(),
            target_version: self.description.target_version.clone(),
            force_restart: self.description.force_restart,
        });
        out.events
            .push(UpgradeEvent::DomainUpgradeStarted { domain });
        self.phase = DomainPhase::Upgrading;
    }

    fn after_apply(&mut self, now: Instant, out: &mut TickOutcome) {
        match self.description.rolling_upgrade_mode {
            RollingUpgradeMode::Monitored => {
                self.phase = DomainPhase::HealthWait { since: now };
            }
            RollingUpgradeMode::UnmonitoredAuto => self.complete_domain(now, out),
            RollingUpgradeMode::UnmonitoredManual => {
                self.phase = DomainPhase::AwaitingApproval;
            }
        }
    }

    fn complete_domain(&mut self, now: Instant, out: &mut TickOutcome) {
        let domain = self.domains[self.current].clone();
        self.completed.push(domain.clone());
        out.events
            .push(UpgradeEvent::DomainUpgradeCompleted { domain });
        self.current += 1;
        if self.current == self.domains.len() {
            self.state = UpgradeState::RollingForwardCompleted;
            self.status_details = format!(
                "upgrade to {} completed",
                self.description.target_version
            );
            out.events.push(UpgradeEvent::UpgradeCompleted);
        } else {
            self.enter_domain(now);
        }
    }

    fn fail(&mut self, reason: FailureReason, now: Instant, out: &mut TickOutcome) {
        self.failure_reason = reason;
        let manual =
            self.monitored() && self.description.monitoring_policy.failure_action() == FailureAction::Manual;
        if manual {
            self.state = UpgradeState::Failed;
            self.status_details = format!(
                "upgrade to {} failed ({:?}); failureAction is Manual, operator intervention required",
                self.description.target_version, reason
            );
            out.events.push(UpgradeEvent::UpgradeFailed {
                reason,
                details: self.status_details.clone(),
            });
            return;
        }

        self.status_details = format!(
            "upgrade to {} failed ({:?}); rolling back",
            self.description.target_version, reason
        );
        self.rollback_queue = self.completed.iter().rev().cloned().collect();
        self.state = UpgradeState::RollingBackInProgress;
        out.events.push(UpgradeEvent::RollbackStarted { reason });
        if self.rollback_queue.is_empty() {
            self.finish_rollback(out);
        } else {
            self.phase = DomainPhase::SafetyCheck { since: now };
            self.domain_entered_at = now;
            self.work_done = false;
        }
    }

    fn finish_rollback(&mut self, out: &mut TickOutcome) {
        self.state = UpgradeState::RollingBackCompleted;
        self.status_details = format!(
            "rolled back to {} ({:?})",
            self.description.current_version, self.failure_reason
        );
        out.events.push(UpgradeEvent::RollbackCompleted);
    }

    /// Rollback walks the completed domains in reverse completion order,
    /// safety-gated but not health-gated.
    fn tick_rollback(&mut self, now: Instant, cluster: &ClusterSnapshot, out: &mut TickOutcome) {
        let domain = match self.rollback_queue.front() {
            Some(d) => d.clone(),
            None => return,
        };

        match self.phase {
            DomainPhase::SafetyCheck { since } => {
                if self.safety_clear(since, now, cluster) {
                    if self.is_noop() {
                        self.work_done = true;
                    } else {
                        out.actions.push(UpgradeAction::RevertDomain {
                            domain: domain.clone(),
                            target_version: self.description.current_version.clone(),
                        });
                        out.events
                            .push(UpgradeEvent::DomainUpgradeStarted { domain });
                    }
                    self.phase = DomainPhase::Upgrading;
                }
            }
            DomainPhase::Upgrading => {
                if self.work_done {
                    self.work_done = false;
                    self.rollback_queue.pop_front();
                    // Reverted: the domain is back on the source version and
                    // reports Pending again.
                    self.completed.retain(|d| d != &domain);
                    out.events
                        .push(UpgradeEvent::DomainUpgradeCompleted { domain });
                    if self.rollback_queue.is_empty() {
                        self.finish_rollback(out);
                    } else {
                        self.phase = DomainPhase::SafetyCheck { since: now };
                        self.domain_entered_at = now;
                    }
                }
            }
            // Rollback uses only the two phases above.
            _ => {
                self.phase = DomainPhase::SafetyCheck { since: now };
            }
        }
    }

    /// Wire-visible progress.
    pub fn progress(&self) -> UpgradeProgress {
        let active = self.active_domain().cloned();
        let upgrade_domains = self
            .domains
            .iter()
            .map(|name| {
                let state = if Some(name) == active.as_ref() {
                    UpgradeDomainState::InProgress
                } else if self.completed.contains(name) && !self.rollback_queue.contains(name) {
                    UpgradeDomainState::Completed
                } else if self.state == UpgradeState::RollingForwardCompleted {
                    UpgradeDomainState::Completed
                } else {
                    UpgradeDomainState::Pending
                };
                UpgradeDomainProgress {
                    name: name.clone(),
                    state,
                }
            })
            .collect();
        UpgradeProgress {
            upgrade_state: self.state,
            current_upgrade_domain: active,
            upgrade_domains,
            failure_reason: self.failure_reason,
            upgrade_status_details: self.status_details.clone(),
            health_check_retry_flips: self.health_check_retry_flips,
        }
    }
}
