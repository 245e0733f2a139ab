//! Upgrade runtime.
//!
//! Owns the orchestrator and its tick loop. Node actions are handed to the
//! external driver through an mpsc channel; the driver reports completions
//! back through `domain_work_completed`. Observers subscribe to upgrade
//! events on a broadcast bus.

use crate::clock::Clock;
use crate::health::store::HealthStore;
use crate::model::ClusterSnapshot;
use crate::upgrade::event::UpgradeEvent;
use crate::upgrade::orchestrator::{
    UpgradeAction, UpgradeOrchestrator, UpgradeProgress, UpgradeState,
};
use crate::upgrade::policy::{UpgradeDescription, ValidationError};
use slog::{info, warn, Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Supplies the current placement view to the tick loop.
///
/// Implementations read whatever the failover layer knows right now; the
/// runtime never caches a snapshot across ticks.
pub trait SnapshotSource: Send + Sync {
    fn cluster_snapshot(&self) -> ClusterSnapshot;
}

/// Errors from the runtime's upgrade API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeRuntimeError {
    /// A non-terminal upgrade already exists; one upgrade at a time.
    AlreadyInProgress,
    /// The operation needs an active upgrade and there is none.
    NoUpgradeInProgress,
    Validation(ValidationError),
}

impl std::fmt::Display for UpgradeRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeRuntimeError::AlreadyInProgress => {
                write!(f, "an upgrade is already in progress")
            }
            UpgradeRuntimeError::NoUpgradeInProgress => write!(f, "no upgrade in progress"),
            UpgradeRuntimeError::Validation(e) => write!(f, "invalid upgrade description: {}", e),
        }
    }
}

impl std::error::Error for UpgradeRuntimeError {}

impl From<ValidationError> for UpgradeRuntimeError {
    fn from(e: ValidationError) -> Self {
        UpgradeRuntimeError::Validation(e)
    }
}

/// Tuning for the upgrade runtime.
#[derive(Clone, Debug)]
pub struct UpgradeRuntimeConfig {
    /// How often the orchestrator re-evaluates.
    pub tick_interval: Duration,

    /// Depth of the driver action channel.
    pub action_queue_depth: usize,

    /// Capacity of the event broadcast bus.
    pub event_bus_capacity: usize,
}

impl Default for UpgradeRuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            action_queue_depth: 64,
            event_bus_capacity: 256,
        }
    }
}

/// High-level runtime for rolling upgrades.
///
/// Provides a simple API for:
/// - Submitting, approving, and interrupting upgrades
/// - Querying progress
/// - Subscribing to upgrade events
pub struct UpgradeRuntime {
    /// At most one orchestrator; replaced only once terminal.
    orchestrator: Mutex<Option<UpgradeOrchestrator>>,

    health_store: Arc<HealthStore>,
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,

    /// Node actions for the external driver.
    action_tx: mpsc::Sender<UpgradeAction>,

    /// Event bus for upgrade event notifications.
    event_bus: broadcast::Sender<UpgradeEvent>,

    config: UpgradeRuntimeConfig,
    logger: Logger,
}

impl UpgradeRuntime {
    /// Create a new upgrade runtime.
    ///
    /// Returns the runtime and the receiving half of the driver action
    /// channel. The caller is expected to drain the receiver, apply each
    /// action, and report completions via `domain_work_completed`.
    pub fn new(
        health_store: Arc<HealthStore>,
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
        config: UpgradeRuntimeConfig,
        logger: Logger,
    ) -> (Arc<Self>, mpsc::Receiver<UpgradeAction>) {
        let (action_tx, action_rx) = mpsc::channel(config.action_queue_depth);
        let (event_bus, _) = broadcast::channel(config.event_bus_capacity);

        let runtime = Arc::new(Self {
            orchestrator: Mutex::new(None),
            health_store,
            source,
            clock,
            action_tx,
            event_bus,
            config,
            logger,
        });
        (runtime, action_rx)
    }

    /// Run the tick loop. Spawn this once; it never returns.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        info!(self.logger, "Upgrade runtime started";
            "tick_interval_ms" => self.config.tick_interval.as_millis() as u64
        );
        loop {
            ticker.tick().await;
            self.step().await;
        }
    }

    /// Advance the orchestrator one tick. The loop calls this on its
    /// interval; tests call it directly with a manual clock.
    pub async fn step(&self) {
        // The orchestrator lock is not held across driver sends; progress
        // queries stay answerable while the action channel is full.
        let outcome = {
            let mut slot = self.orchestrator.lock().await;
            let orchestrator = match slot.as_mut() {
                Some(o) if !o.is_terminal() => o,
                _ => return,
            };

            let now_utc = self.clock.utc_now();
            self.health_store.sweep_expired(now_utc);

            let cluster = self.source.cluster_snapshot();
            let health = self.health_store.snapshot(now_utc);
            orchestrator.tick(self.clock.now(), &cluster, &health)
        };

        for event in outcome.events {
            info!(self.logger, "Upgrade event"; "event" => ?event);
            let _ = self.event_bus.send(event);
        }
        for action in outcome.actions {
            if self.action_tx.send(action.clone()).await.is_err() {
                warn!(self.logger, "Driver action channel closed, dropping action";
                    "action" => ?action
                );
            }
        }
    }

    /// Submit an upgrade. Rejected while another upgrade is non-terminal.
    pub async fn start_upgrade(
        &self,
        description: UpgradeDescription,
    ) -> Result<(), UpgradeRuntimeError> {
        let mut slot = self.orchestrator.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.is_terminal() {
                return Err(UpgradeRuntimeError::AlreadyInProgress);
            }
        }

        info!(self.logger, "Starting upgrade";
            "target" => %description.target,
            "target_version" => &description.target_version,
            "mode" => ?description.rolling_upgrade_mode
        );

        let cluster = self.source.cluster_snapshot();
        let orchestrator = UpgradeOrchestrator::new(description, &cluster, self.clock.now())?;
        *slot = Some(orchestrator);
        Ok(())
    }

    /// Driver completion callback for one domain's node actions.
    pub async fn domain_work_completed(&self, domain: &str) -> Result<(), UpgradeRuntimeError> {
        let mut slot = self.orchestrator.lock().await;
        match slot.as_mut() {
            Some(o) if !o.is_terminal() => {
                info!(self.logger, "Domain work completed"; "domain" => domain);
                o.domain_work_completed(domain);
                Ok(())
            }
            _ => Err(UpgradeRuntimeError::NoUpgradeInProgress),
        }
    }

    /// UnmonitoredManual: approve advancing past the current domain.
    pub async fn approve_next_domain(&self) -> Result<(), UpgradeRuntimeError> {
        let mut slot = self.orchestrator.lock().await;
        match slot.as_mut() {
            Some(o) if !o.is_terminal() => {
                info!(self.logger, "Next upgrade domain approved");
                o.approve_next_domain();
                Ok(())
            }
            _ => Err(UpgradeRuntimeError::NoUpgradeInProgress),
        }
    }

    /// Cancel the running upgrade; it unwinds on the next tick.
    pub async fn interrupt(&self) -> Result<(), UpgradeRuntimeError> {
        let mut slot = self.orchestrator.lock().await;
        match slot.as_mut() {
            Some(o) if !o.is_terminal() => {
                info!(self.logger, "Upgrade interrupted by operator");
                o.interrupt();
                Ok(())
            }
            _ => Err(UpgradeRuntimeError::NoUpgradeInProgress),
        }
    }

    /// Progress of the current (or last) upgrade, if any was submitted.
    pub async fn progress(&self) -> Option<UpgradeProgress> {
        self.orchestrator.lock().await.as_ref().map(|o| o.progress())
    }

    /// State of the current (or last) upgrade.
    pub async fn upgrade_state(&self) -> Option<UpgradeState> {
        self.orchestrator.lock().await.as_ref().map(|o| o.state())
    }

    /// Subscribe to upgrade events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UpgradeEvent> {
        self.event_bus.subscribe()
    }

    /// The shared health store backing evaluations.
    pub fn health_store(&self) -> &Arc<HealthStore> {
        &self.health_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{NodeInfo, NodeName, NodeStatus};
    use crate::upgrade::policy::RollingUpgradeMode;
    use std::sync::Mutex as StdMutex;

    struct FixedSource {
        cluster: StdMutex<ClusterSnapshot>,
    }

    impl FixedSource {
        fn new(cluster: ClusterSnapshot) -> Self {
            Self {
                cluster: StdMutex::new(cluster),
            }
        }
    }

    impl SnapshotSource for FixedSource {
        fn cluster_snapshot(&self) -> ClusterSnapshot {
            self.cluster.lock().unwrap().clone()
        }
    }

    fn create_logger() -> Logger {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(std::io::stdout());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, slog::o!())
    }

    fn two_domain_cluster() -> ClusterSnapshot {
        ClusterSnapshot {
            nodes: ["UD0", "UD0", "UD1", "UD1"]
                .iter()
                .enumerate()
                .map(|(i, domain)| NodeInfo {
                    name: NodeName::new(format!("n{}", i)),
                    node_type: "default".to_string(),
                    upgrade_domain: domain.to_string(),
                    is_seed: false,
                    status: NodeStatus::Up,
                })
                .collect(),
            applications: vec![],
        }
    }

    fn unmonitored_description() -> UpgradeDescription {
        let mut description: UpgradeDescription = serde_json::from_str(
            r#"{"target": "Cluster", "currentVersion": "1.0", "targetVersion": "2.0"}"#,
        )
        .unwrap();
        description.rolling_upgrade_mode = RollingUpgradeMode::UnmonitoredAuto;
        description
    }

    fn runtime() -> (Arc<UpgradeRuntime>, mpsc::Receiver<UpgradeAction>) {
        UpgradeRuntime::new(
            Arc::new(HealthStore::new()),
            Arc::new(FixedSource::new(two_domain_cluster())),
            Arc::new(ManualClock::new()),
            UpgradeRuntimeConfig::default(),
            create_logger(),
        )
    }

    #[tokio::test]
    async fn test_single_active_upgrade() {
        let (runtime, _action_rx) = runtime();
        runtime.start_upgrade(unmonitored_description()).await.unwrap();
        assert_eq!(
            runtime.start_upgrade(unmonitored_description()).await,
            Err(UpgradeRuntimeError::AlreadyInProgress)
        );
    }

    #[tokio::test]
    async fn test_operations_require_active_upgrade() {
        let (runtime, _action_rx) = runtime();
        assert_eq!(
            runtime.interrupt().await,
            Err(UpgradeRuntimeError::NoUpgradeInProgress)
        );
        assert_eq!(
            runtime.approve_next_domain().await,
            Err(UpgradeRuntimeError::NoUpgradeInProgress)
        );
        assert_eq!(runtime.progress().await, None);
    }

    #[tokio::test]
    async fn test_unmonitored_upgrade_drives_actions_through_channel() {
        let (runtime, mut action_rx) = runtime();
        let mut events = runtime.subscribe_events();
        runtime.start_upgrade(unmonitored_description()).await.unwrap();

        for expected in ["UD0", "UD1"] {
            runtime.step().await;
            let action = action_rx.recv().await.unwrap();
            match action {
                UpgradeAction::ApplyDomain {
                    domain,
                    target_version,
                    force_restart,
                } => {
                    assert_eq!(domain, expected);
                    assert_eq!(target_version, "2.0");
                    assert!(!force_restart);
                }
                other => panic!("unexpected action {:?}", other),
            }
            runtime.domain_work_completed(expected).await.unwrap();
            runtime.step().await;
        }

        assert_eq!(
            runtime.upgrade_state().await,
            Some(UpgradeState::RollingForwardCompleted)
        );
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if event == UpgradeEvent::UpgradeCompleted {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn test_progress_available_while_driver_backlogged() {
        let (runtime, mut action_rx) = UpgradeRuntime::new(
            Arc::new(HealthStore::new()),
            Arc::new(FixedSource::new(two_domain_cluster())),
            Arc::new(ManualClock::new()),
            UpgradeRuntimeConfig {
                action_queue_depth: 1,
                ..Default::default()
            },
            create_logger(),
        );
        runtime.start_upgrade(unmonitored_description()).await.unwrap();

        // UD0's apply fills the depth-1 channel; UD1's apply must park.
        runtime.step().await;
        runtime.domain_work_completed("UD0").await.unwrap();
        runtime.step().await;
        let stepper = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.step().await })
        };
        tokio::task::yield_now().await;

        let progress = tokio::time::timeout(Duration::from_secs(5), runtime.progress())
            .await
            .expect("progress while the driver is backlogged")
            .unwrap();
        assert_eq!(
            progress.upgrade_state,
            UpgradeState::RollingForwardInProgress
        );

        // Drain: the parked send completes once the driver catches up.
        let first = action_rx.recv().await.unwrap();
        assert!(matches!(first, UpgradeAction::ApplyDomain { ref domain, .. } if domain == "UD0"));
        stepper.await.unwrap();
        let second = action_rx.recv().await.unwrap();
        assert!(matches!(second, UpgradeAction::ApplyDomain { ref domain, .. } if domain == "UD1"));
    }

    #[tokio::test]
    async fn test_new_upgrade_allowed_after_terminal() {
        let (runtime, mut action_rx) = runtime();
        runtime.start_upgrade(unmonitored_description()).await.unwrap();

        runtime.step().await;
        runtime.interrupt().await.unwrap();
        runtime.step().await;
        // Rollback of zero completed domains finishes immediately.
        assert_eq!(
            runtime.upgrade_state().await,
            Some(UpgradeState::RollingBackCompleted)
        );
        // Drain the apply that was issued before the interrupt.
        while action_rx.try_recv().is_ok() {}

        runtime.start_upgrade(unmonitored_description()).await.unwrap();
        assert_eq!(
            runtime.upgrade_state().await,
            Some(UpgradeState::RollingForwardPending)
        );
    }
}
