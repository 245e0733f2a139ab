//! Hierarchical health aggregation.
//!
//! Pure bottom-up evaluation over a placement snapshot and a health-store
//! snapshot. No I/O, no clocks: same inputs, same verdict and same tree.
//!
//! The rollup rule at every parent level: tolerated unhealthy children =
//! floor(maxPercent * total / 100). One more unhealthy child than that flips
//! the parent to Error; unhealthy children within the floor leave the parent
//! at Warning. A type listed in an override map is pulled out of the global
//! pool and evaluated in its own bucket against the override percentage.

use crate::health::evaluation::HealthEvaluation;
use crate::health::event::HealthState;
use crate::health::policy::{
    tolerated_unhealthy, ApplicationHealthPolicy, ClusterHealthPolicy, ClusterUpgradeHealthPolicy,
};
use crate::health::store::HealthSnapshot;
use crate::model::{
    ApplicationInfo, ClusterSnapshot, EntityId, NodeInfo, PartitionInfo, ServiceInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of evaluating an entity subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthVerdict {
    pub aggregated_health_state: HealthState,
    pub unhealthy_evaluations: Vec<HealthEvaluation>,
}

impl HealthVerdict {
    fn ok() -> Self {
        Self {
            aggregated_health_state: HealthState::Ok,
            unhealthy_evaluations: Vec::new(),
        }
    }
}

/// Node error counts captured before an upgrade, for delta evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBaseline {
    pub error_count: usize,
    pub total_count: usize,

    /// Upgrade domain name → (error count, total count).
    pub per_domain: BTreeMap<String, (usize, usize)>,
}

/// Extra checks applied to the cluster rollup during a monitored upgrade.
pub struct UpgradeHealthContext<'a> {
    pub baseline: &'a DeltaBaseline,
    pub policy: &'a ClusterUpgradeHealthPolicy,

    /// Domain currently being upgraded, for the per-domain checks.
    pub current_domain: Option<&'a str>,
}

/// Outcome of one child entity, carried up to its parent's rollup.
struct ChildOutcome {
    state: HealthState,
    /// Wrapper evaluation; present when the child is not Ok.
    wrapper: Option<HealthEvaluation>,
}

/// Aggregate child outcomes under a tolerance percentage.
///
/// Returns (parent state, unhealthy count, wrappers of non-Ok children).
fn rollup(
    children: &[ChildOutcome],
    max_percent: u16,
    consider_warning_as_error: bool,
) -> (HealthState, usize, Vec<HealthEvaluation>) {
    let total = children.len();
    if total == 0 {
        // Vacuously healthy.
        return (HealthState::Ok, 0, Vec::new());
    }

    let unhealthy = children
        .iter()
        .filter(|c| c.state.is_unhealthy(consider_warning_as_error))
        .count();
    let any_not_ok = children.iter().any(|c| c.state != HealthState::Ok);

    let state = if unhealthy > tolerated_unhealthy(max_percent, total) {
        HealthState::Error
    } else if any_not_ok {
        HealthState::Warning
    } else {
        HealthState::Ok
    };

    let wrappers = children
        .iter()
        .filter_map(|c| c.wrapper.clone())
        .collect();

    (state, unhealthy, wrappers)
}

/// Evaluate the events reported directly on an entity.
///
/// Unknown when the entity has no events; otherwise the max severity across
/// active and stale events, with considerWarningAsError promotion.
fn evaluate_events(
    health: &HealthSnapshot,
    entity: &EntityId,
    consider_warning_as_error: bool,
) -> (HealthState, Vec<HealthEvaluation>) {
    let views = health.events_for(entity);
    if views.is_empty() {
        return (HealthState::Unknown, Vec::new());
    }

    let mut state = HealthState::Ok;
    let mut evaluations = Vec::new();
    for view in views {
        let event_state = view.event.health_state.promoted(consider_warning_as_error);
        state = state.merge(event_state);
        if event_state != HealthState::Ok {
            let stale_note = if view.stale { " (expired)" } else { "" };
            evaluations.push(HealthEvaluation::Event {
                aggregated_health_state: event_state,
                description: format!(
                    "'{}' reported {:?} on '{}'{}",
                    view.event.source_id, view.event.health_state, view.event.property, stale_note
                ),
                consider_warning_as_error,
                unhealthy_event: view.clone(),
            });
        }
    }
    (state, evaluations)
}

/// Merge an entity's own-event state into its children rollup state.
///
/// An entity with children but no events of its own is not Unknown; the
/// children speak for it.
fn merge_own_events(children_state: HealthState, events_state: HealthState) -> HealthState {
    if events_state == HealthState::Unknown {
        children_state
    } else {
        children_state.merge(events_state)
    }
}

fn evaluate_partition(
    partition: &PartitionInfo,
    health: &HealthSnapshot,
    policy: &ApplicationHealthPolicy,
    max_percent_unhealthy_replicas: u16,
) -> ChildOutcome {
    let cwa = policy.consider_warning_as_error;

    let mut children = Vec::new();
    for replica in &partition.replicas {
        let entity = EntityId::Replica(partition.id, replica.id);
        let (state, event_evals) = evaluate_events(health, &entity, cwa);
        let wrapper = (state != HealthState::Ok).then(|| HealthEvaluation::Replica {
            aggregated_health_state: state,
            partition_id: partition.id,
            replica_id: replica.id,
            unhealthy_evaluations: event_evals,
        });
        children.push(ChildOutcome { state, wrapper });
    }

    let (children_state, unhealthy, wrappers) =
        rollup(&children, max_percent_unhealthy_replicas, cwa);
    let (events_state, event_evals) =
        evaluate_events(health, &EntityId::Partition(partition.id), cwa);

    let state = if children.is_empty() && events_state == HealthState::Unknown {
        HealthState::Unknown
    } else {
        merge_own_events(children_state, events_state)
    };

    let mut evaluations = event_evals;
    if !wrappers.is_empty() {
        evaluations.push(HealthEvaluation::Replicas {
            aggregated_health_state: children_state,
            description: format!(
                "{} of {} replicas unhealthy, tolerated {}",
                unhealthy,
                children.len(),
                tolerated_unhealthy(max_percent_unhealthy_replicas, children.len())
            ),
            max_percent_unhealthy_replicas_per_partition: max_percent_unhealthy_replicas,
            total_count: children.len(),
            unhealthy_evaluations: wrappers,
        });
    }

    let wrapper = (state != HealthState::Ok).then(|| HealthEvaluation::Partition {
        aggregated_health_state: state,
        partition_id: partition.id,
        unhealthy_evaluations: evaluations,
    });
    ChildOutcome { state, wrapper }
}

fn evaluate_service(
    service: &ServiceInfo,
    health: &HealthSnapshot,
    policy: &ApplicationHealthPolicy,
) -> ChildOutcome {
    let cwa = policy.consider_warning_as_error;
    let type_policy = policy.for_service_type(&service.service_type);

    let children: Vec<ChildOutcome> = service
        .partitions
        .iter()
        .map(|p| {
            evaluate_partition(
                p,
                health,
                policy,
                type_policy.max_percent_unhealthy_replicas_per_partition,
            )
        })
        .collect();

    let (children_state, unhealthy, wrappers) = rollup(
        &children,
        type_policy.max_percent_unhealthy_partitions_per_service,
        cwa,
    );
    let (events_state, event_evals) =
        evaluate_events(health, &EntityId::Service(service.name.clone()), cwa);

    let state = if children.is_empty() && events_state == HealthState::Unknown {
        HealthState::Unknown
    } else {
        merge_own_events(children_state, events_state)
    };

    let mut evaluations = event_evals;
    if !wrappers.is_empty() {
        evaluations.push(HealthEvaluation::Partitions {
            aggregated_health_state: children_state,
            description: format!(
                "{} of {} partitions unhealthy, tolerated {}",
                unhealthy,
                children.len(),
                tolerated_unhealthy(
                    type_policy.max_percent_unhealthy_partitions_per_service,
                    children.len()
                )
            ),
            max_percent_unhealthy_partitions_per_service: type_policy
                .max_percent_unhealthy_partitions_per_service,
            total_count: children.len(),
            unhealthy_evaluations: wrappers,
        });
    }

    let wrapper = (state != HealthState::Ok).then(|| HealthEvaluation::Service {
        aggregated_health_state: state,
        service_name: service.name.clone(),
        unhealthy_evaluations: evaluations,
    });
    ChildOutcome { state, wrapper }
}

/// Evaluate an application subtree against an application health policy.
pub fn evaluate_application(
    application: &ApplicationInfo,
    health: &HealthSnapshot,
    policy: &ApplicationHealthPolicy,
) -> HealthVerdict {
    let outcome = evaluate_application_outcome(application, health, policy);
    match outcome.wrapper {
        Some(HealthEvaluation::Application {
            unhealthy_evaluations,
            ..
        }) => HealthVerdict {
            aggregated_health_state: outcome.state,
            unhealthy_evaluations,
        },
        _ => HealthVerdict {
            aggregated_health_state: outcome.state,
            unhealthy_evaluations: Vec::new(),
        },
    }
}

fn evaluate_application_outcome(
    application: &ApplicationInfo,
    health: &HealthSnapshot,
    policy: &ApplicationHealthPolicy,
) -> ChildOutcome {
    let cwa = policy.consider_warning_as_error;

    // Services are evaluated per service type; each type is its own bucket
    // with its own maxPercentUnhealthyServices.
    let mut by_type: BTreeMap<&str, Vec<&ServiceInfo>> = BTreeMap::new();
    for service in &application.services {
        by_type.entry(&service.service_type).or_default().push(service);
    }

    let mut state = HealthState::Unknown;
    let mut evaluations = Vec::new();
    let mut any_children = false;

    for (service_type, services) in by_type {
        any_children = true;
        let type_policy = policy.for_service_type(service_type);
        let children: Vec<ChildOutcome> = services
            .iter()
            .map(|s| evaluate_service(s, health, policy))
            .collect();
        let (bucket_state, unhealthy, wrappers) =
            rollup(&children, type_policy.max_percent_unhealthy_services, cwa);
        state = if state == HealthState::Unknown {
            bucket_state
        } else {
            state.merge(bucket_state)
        };
        if !wrappers.is_empty() {
            evaluations.push(HealthEvaluation::Services {
                aggregated_health_state: bucket_state,
                description: format!(
                    "{} of {} services of type '{}' unhealthy, tolerated {}",
                    unhealthy,
                    children.len(),
                    service_type,
                    tolerated_unhealthy(type_policy.max_percent_unhealthy_services, children.len())
                ),
                service_type_name: service_type.to_string(),
                max_percent_unhealthy_services: type_policy.max_percent_unhealthy_services,
                total_count: children.len(),
                unhealthy_evaluations: wrappers,
            });
        }
    }

    let (events_state, event_evals) = evaluate_events(
        health,
        &EntityId::Application(application.name.clone()),
        cwa,
    );
    let state = if !any_children && events_state == HealthState::Unknown {
        HealthState::Unknown
    } else if state == HealthState::Unknown && events_state != HealthState::Unknown {
        events_state
    } else {
        merge_own_events(state, events_state)
    };

    let mut all_evals = event_evals;
    all_evals.extend(evaluations);

    let wrapper = (state != HealthState::Ok).then(|| HealthEvaluation::Application {
        aggregated_health_state: state,
        application_name: application.name.clone(),
        unhealthy_evaluations: all_evals,
    });
    ChildOutcome { state, wrapper }
}

fn evaluate_node(
    node: &NodeInfo,
    health: &HealthSnapshot,
    consider_warning_as_error: bool,
) -> ChildOutcome {
    let (state, event_evals) = evaluate_events(
        health,
        &EntityId::Node(node.name.clone()),
        consider_warning_as_error,
    );
    let wrapper = (state != HealthState::Ok).then(|| HealthEvaluation::Node {
        aggregated_health_state: state,
        node_name: node.name.as_str().to_string(),
        unhealthy_evaluations: event_evals,
    });
    ChildOutcome { state, wrapper }
}

/// A node counts toward the delta error count when its own verdict is Error
/// (or Unknown, which is never evidence of health).
fn node_is_error(node: &NodeInfo, health: &HealthSnapshot, cwa: bool) -> bool {
    matches!(
        evaluate_node(node, health, cwa).state,
        HealthState::Error | HealthState::Unknown
    )
}

/// Capture the pre-upgrade node error counts, globally and per upgrade
/// domain, as the baseline for delta evaluation.
pub fn capture_baseline(
    cluster: &ClusterSnapshot,
    health: &HealthSnapshot,
    policy: &ClusterHealthPolicy,
) -> DeltaBaseline {
    let cwa = policy.consider_warning_as_error;
    let mut baseline = DeltaBaseline::default();
    for node in &cluster.nodes {
        let is_error = node_is_error(node, health, cwa);
        baseline.total_count += 1;
        let entry = baseline
            .per_domain
            .entry(node.upgrade_domain.clone())
            .or_insert((0, 0));
        entry.1 += 1;
        if is_error {
            baseline.error_count += 1;
            entry.0 += 1;
        }
    }
    baseline
}

/// Whether a delta exceeds its tolerance: (current - baseline) as a
/// percentage of the baseline total, compared against maxPercentDelta.
fn delta_violated(
    current_errors: usize,
    baseline_errors: usize,
    baseline_total: usize,
    max_percent_delta: u16,
) -> bool {
    if baseline_total == 0 || current_errors <= baseline_errors {
        return false;
    }
    let delta = current_errors - baseline_errors;
    delta * 100 > (max_percent_delta as usize) * baseline_total
}

/// Evaluate the whole cluster: nodes (with node-type override buckets),
/// applications (with application-type override buckets), cluster events,
/// and optionally the upgrade-time delta checks.
pub fn evaluate_cluster(
    cluster: &ClusterSnapshot,
    health: &HealthSnapshot,
    policy: &ClusterHealthPolicy,
    upgrade: Option<&UpgradeHealthContext<'_>>,
) -> HealthVerdict {
    let cwa = policy.consider_warning_as_error;
    let mut verdict = HealthVerdict::ok();
    let mut state = HealthState::Ok;

    // Nodes: override buckets by node type, remainder in the global pool.
    let mut global_nodes: Vec<ChildOutcome> = Vec::new();
    let mut type_buckets: BTreeMap<&str, Vec<ChildOutcome>> = BTreeMap::new();
    for node in &cluster.nodes {
        let outcome = evaluate_node(node, health, cwa);
        if policy.node_type_health_policy_map.contains_key(&node.node_type) {
            type_buckets.entry(&node.node_type).or_default().push(outcome);
        } else {
            global_nodes.push(outcome);
        }
    }

    let (nodes_state, unhealthy, wrappers) =
        rollup(&global_nodes, policy.max_percent_unhealthy_nodes, cwa);
    state = state.merge(nodes_state);
    if !wrappers.is_empty() {
        verdict.unhealthy_evaluations.push(HealthEvaluation::Nodes {
            aggregated_health_state: nodes_state,
            description: format!(
                "{} of {} nodes unhealthy, tolerated {}",
                unhealthy,
                global_nodes.len(),
                tolerated_unhealthy(policy.max_percent_unhealthy_nodes, global_nodes.len())
            ),
            max_percent_unhealthy_nodes: policy.max_percent_unhealthy_nodes,
            total_count: global_nodes.len(),
            unhealthy_evaluations: wrappers,
        });
    }

    for (node_type, outcomes) in type_buckets {
        let max_percent = policy.node_type_health_policy_map[node_type];
        let (bucket_state, unhealthy, wrappers) = rollup(&outcomes, max_percent, cwa);
        state = state.merge(bucket_state);
        if !wrappers.is_empty() {
            verdict
                .unhealthy_evaluations
                .push(HealthEvaluation::NodeTypeNodes {
                    aggregated_health_state: bucket_state,
                    description: format!(
                        "{} of {} nodes of type '{}' unhealthy, tolerated {}",
                        unhealthy,
                        outcomes.len(),
                        node_type,
                        tolerated_unhealthy(max_percent, outcomes.len())
                    ),
                    node_type_name: node_type.to_string(),
                    max_percent_unhealthy_nodes: max_percent,
                    total_count: outcomes.len(),
                    unhealthy_evaluations: wrappers,
                });
        }
    }

    // Applications: override buckets by application type, remainder global.
    let mut global_apps: Vec<ChildOutcome> = Vec::new();
    let mut app_type_buckets: BTreeMap<&str, Vec<ChildOutcome>> = BTreeMap::new();
    for app in &cluster.applications {
        let outcome = evaluate_application_outcome(app, health, &policy.application_health_policy);
        if policy
            .application_type_health_policy_map
            .contains_key(&app.application_type)
        {
            app_type_buckets
                .entry(&app.application_type)
                .or_default()
                .push(outcome);
        } else {
            global_apps.push(outcome);
        }
    }

    let (apps_state, unhealthy, wrappers) =
        rollup(&global_apps, policy.max_percent_unhealthy_applications, cwa);
    state = state.merge(apps_state);
    if !wrappers.is_empty() {
        verdict
            .unhealthy_evaluations
            .push(HealthEvaluation::Applications {
                aggregated_health_state: apps_state,
                description: format!(
                    "{} of {} applications unhealthy, tolerated {}",
                    unhealthy,
                    global_apps.len(),
                    tolerated_unhealthy(
                        policy.max_percent_unhealthy_applications,
                        global_apps.len()
                    )
                ),
                max_percent_unhealthy_applications: policy.max_percent_unhealthy_applications,
                total_count: global_apps.len(),
                unhealthy_evaluations: wrappers,
            });
    }

    for (app_type, outcomes) in app_type_buckets {
        let max_percent = policy.application_type_health_policy_map[app_type];
        let (bucket_state, unhealthy, wrappers) = rollup(&outcomes, max_percent, cwa);
        state = state.merge(bucket_state);
        if !wrappers.is_empty() {
            verdict
                .unhealthy_evaluations
                .push(HealthEvaluation::ApplicationTypeApplications {
                    aggregated_health_state: bucket_state,
                    description: format!(
                        "{} of {} applications of type '{}' unhealthy, tolerated {}",
                        unhealthy,
                        outcomes.len(),
                        app_type,
                        tolerated_unhealthy(max_percent, outcomes.len())
                    ),
                    application_type_name: app_type.to_string(),
                    max_percent_unhealthy_applications: max_percent,
                    total_count: outcomes.len(),
                    unhealthy_evaluations: wrappers,
                });
        }
    }

    // Events reported directly on the cluster entity.
    let (events_state, event_evals) = evaluate_events(health, &EntityId::Cluster, cwa);
    if events_state != HealthState::Unknown {
        state = state.merge(events_state);
    }
    verdict.unhealthy_evaluations.extend(event_evals);

    // Upgrade-time checks: per-domain absolute, global delta, per-domain delta.
    if let Some(ctx) = upgrade {
        if let Some(domain) = ctx.current_domain {
            let domain_nodes: Vec<ChildOutcome> = cluster
                .nodes_in_domain(domain)
                .into_iter()
                .map(|n| evaluate_node(n, health, cwa))
                .collect();
            let (ud_state, unhealthy, wrappers) =
                rollup(&domain_nodes, policy.max_percent_unhealthy_nodes, cwa);
            if ud_state == HealthState::Error {
                state = state.merge(HealthState::Error);
            }
            if !wrappers.is_empty() {
                verdict
                    .unhealthy_evaluations
                    .push(HealthEvaluation::UpgradeDomainNodes {
                        aggregated_health_state: ud_state,
                        description: format!(
                            "{} of {} nodes in upgrade domain '{}' unhealthy, tolerated {}",
                            unhealthy,
                            domain_nodes.len(),
                            domain,
                            tolerated_unhealthy(
                                policy.max_percent_unhealthy_nodes,
                                domain_nodes.len()
                            )
                        ),
                        upgrade_domain_name: domain.to_string(),
                        max_percent_unhealthy_nodes: policy.max_percent_unhealthy_nodes,
                        total_count: domain_nodes.len(),
                        unhealthy_evaluations: wrappers,
                    });
            }
        }

        let current_errors = cluster
            .nodes
            .iter()
            .filter(|n| node_is_error(n, health, cwa))
            .count();
        if delta_violated(
            current_errors,
            ctx.baseline.error_count,
            ctx.baseline.total_count,
            ctx.policy.max_percent_delta_unhealthy_nodes,
        ) {
            state = state.merge(HealthState::Error);
            verdict
                .unhealthy_evaluations
                .push(HealthEvaluation::DeltaNodesCheck {
                    aggregated_health_state: HealthState::Error,
                    description: format!(
                        "node error count grew from {} to {} of baseline {} nodes, tolerated delta {}%",
                        ctx.baseline.error_count,
                        current_errors,
                        ctx.baseline.total_count,
                        ctx.policy.max_percent_delta_unhealthy_nodes
                    ),
                    baseline_error_count: ctx.baseline.error_count,
                    baseline_total_count: ctx.baseline.total_count,
                    current_error_count: current_errors,
                    total_count: cluster.nodes.len(),
                    max_percent_delta_unhealthy_nodes: ctx
                        .policy
                        .max_percent_delta_unhealthy_nodes,
                    unhealthy_evaluations: Vec::new(),
                });
        }

        if let Some(domain) = ctx.current_domain {
            if let Some(&(baseline_errors, baseline_total)) = ctx.baseline.per_domain.get(domain) {
                let domain_errors = cluster
                    .nodes_in_domain(domain)
                    .into_iter()
                    .filter(|n| node_is_error(n, health, cwa))
                    .count();
                if delta_violated(
                    domain_errors,
                    baseline_errors,
                    baseline_total,
                    ctx.policy.max_percent_upgrade_domain_delta_unhealthy_nodes,
                ) {
                    state = state.merge(HealthState::Error);
                    verdict
                        .unhealthy_evaluations
                        .push(HealthEvaluation::UpgradeDomainDeltaNodesCheck {
                            aggregated_health_state: HealthState::Error,
                            description: format!(
                                "upgrade domain '{}' error count grew from {} to {} of baseline {} nodes, tolerated delta {}%",
                                domain,
                                baseline_errors,
                                domain_errors,
                                baseline_total,
                                ctx.policy.max_percent_upgrade_domain_delta_unhealthy_nodes
                            ),
                            upgrade_domain_name: domain.to_string(),
                            baseline_error_count: baseline_errors,
                            baseline_total_count: baseline_total,
                            current_error_count: domain_errors,
                            total_count: cluster.nodes_in_domain(domain).len(),
                            max_percent_upgrade_domain_delta_unhealthy_nodes: ctx
                                .policy
                                .max_percent_upgrade_domain_delta_unhealthy_nodes,
                            unhealthy_evaluations: Vec::new(),
                        });
                }
            }
        }
    }

    verdict.aggregated_health_state = state;
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::event::HealthEvent;
    use crate::health::store::HealthStore;
    use crate::model::{NodeName, NodeStatus};
    use chrono::Utc;

    fn node(name: &str, node_type: &str, domain: &str) -> NodeInfo {
        NodeInfo {
            name: NodeName::new(name),
            node_type: node_type.to_string(),
            upgrade_domain: domain.to_string(),
            is_seed: false,
            status: NodeStatus::Up,
        }
    }

    fn report(store: &HealthStore, entity: EntityId, state: HealthState) {
        store
            .report(
                entity,
                HealthEvent {
                    source_id: "watchdog".to_string(),
                    property: "Status".to_string(),
                    health_state: state,
                    sequence_number: 1,
                    time_to_live_in_milliseconds: None,
                    description: String::new(),
                    remove_when_expired: false,
                    source_utc_timestamp: Utc::now(),
                },
            )
            .unwrap();
    }

    fn cluster_of_nodes(count: usize) -> (ClusterSnapshot, HealthStore) {
        let cluster = ClusterSnapshot {
            nodes: (0..count)
                .map(|i| node(&format!("n{}", i), "default", &format!("UD{}", i % 5)))
                .collect(),
            applications: vec![],
        };
        let store = HealthStore::new();
        for n in &cluster.nodes {
            report(&store, EntityId::Node(n.name.clone()), HealthState::Ok);
        }
        (cluster, store)
    }

    fn set_node_state(store: &HealthStore, name: &str, state: HealthState) {
        store
            .report(
                EntityId::Node(NodeName::new(name)),
                HealthEvent {
                    source_id: "watchdog".to_string(),
                    property: "Status".to_string(),
                    health_state: state,
                    sequence_number: 2,
                    time_to_live_in_milliseconds: None,
                    description: String::new(),
                    remove_when_expired: false,
                    source_utc_timestamp: Utc::now(),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_rounding_property_two_tolerated_third_flips() {
        // N=20, P=10 → tolerate floor(2.0)=2 as Warning-at-worst.
        let (cluster, store) = cluster_of_nodes(20);
        let policy = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 10,
            ..Default::default()
        };

        set_node_state(&store, "n0", HealthState::Error);
        set_node_state(&store, "n1", HealthState::Error);
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, None);
        assert_eq!(verdict.aggregated_health_state, HealthState::Warning);

        set_node_state(&store, "n2", HealthState::Error);
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, None);
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
    }

    #[test]
    fn test_all_healthy_is_ok() {
        let (cluster, store) = cluster_of_nodes(5);
        let verdict = evaluate_cluster(
            &cluster,
            &store.snapshot(Utc::now()),
            &ClusterHealthPolicy::default(),
            None,
        );
        assert_eq!(verdict.aggregated_health_state, HealthState::Ok);
        assert!(verdict.unhealthy_evaluations.is_empty());
    }

    #[test]
    fn test_empty_cluster_vacuously_ok() {
        let cluster = ClusterSnapshot::default();
        let store = HealthStore::new();
        let verdict = evaluate_cluster(
            &cluster,
            &store.snapshot(Utc::now()),
            &ClusterHealthPolicy::default(),
            None,
        );
        assert_eq!(verdict.aggregated_health_state, HealthState::Ok);
    }

    #[test]
    fn test_node_without_events_counts_unhealthy() {
        let (cluster, store) = cluster_of_nodes(4);
        let extra = node("silent", "default", "UD0");
        let mut cluster = cluster;
        cluster.nodes.push(extra);
        // 1 of 5 Unknown, tolerance 0 → Error.
        let verdict = evaluate_cluster(
            &cluster,
            &store.snapshot(Utc::now()),
            &ClusterHealthPolicy::default(),
            None,
        );
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
    }

    #[test]
    fn test_consider_warning_as_error_promotion() {
        let (cluster, store) = cluster_of_nodes(10);
        set_node_state(&store, "n0", HealthState::Warning);

        let lenient = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 0,
            consider_warning_as_error: false,
            ..Default::default()
        };
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &lenient, None);
        assert_eq!(verdict.aggregated_health_state, HealthState::Warning);

        let strict = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 0,
            consider_warning_as_error: true,
            ..Default::default()
        };
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &strict, None);
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
    }

    #[test]
    fn test_override_bucket_isolation() {
        // 4 backend nodes under a 100% override, 4 frontend in the global
        // pool with 0% tolerance. Backend errors must not leak into the
        // global denominator or verdict.
        let cluster = ClusterSnapshot {
            nodes: (0..4)
                .map(|i| node(&format!("b{}", i), "Backend", "UD0"))
                .chain((0..4).map(|i| node(&format!("f{}", i), "Frontend", "UD1")))
                .collect(),
            applications: vec![],
        };
        let store = HealthStore::new();
        for n in &cluster.nodes {
            report(&store, EntityId::Node(n.name.clone()), HealthState::Ok);
        }
        set_node_state(&store, "b0", HealthState::Error);
        set_node_state(&store, "b1", HealthState::Error);

        let mut policy = ClusterHealthPolicy::default();
        policy.max_percent_unhealthy_nodes = 0;
        policy
            .node_type_health_policy_map
            .insert("Backend".to_string(), 100);

        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, None);
        // Errors within the override tolerance → Warning overall, not Error.
        assert_eq!(verdict.aggregated_health_state, HealthState::Warning);
        assert!(verdict.unhealthy_evaluations.iter().any(|e| matches!(
            e,
            HealthEvaluation::NodeTypeNodes { node_type_name, .. } if node_type_name == "Backend"
        )));

        // A frontend error trips the 0% global pool immediately.
        set_node_state(&store, "f0", HealthState::Error);
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, None);
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
    }

    #[test]
    fn test_idempotence() {
        let (cluster, store) = cluster_of_nodes(12);
        set_node_state(&store, "n3", HealthState::Error);
        set_node_state(&store, "n7", HealthState::Warning);
        let snapshot = store.snapshot(Utc::now());
        let policy = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 20,
            ..Default::default()
        };

        let first = evaluate_cluster(&cluster, &snapshot, &policy, None);
        let second = evaluate_cluster(&cluster, &snapshot, &policy, None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_delta_violation_despite_absolute_pass() {
        // Baseline 0 errors of 10; 2 new errors = 20% delta > 10% tolerance,
        // while the absolute policy tolerates them.
        let (cluster, store) = cluster_of_nodes(10);
        let policy = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 30,
            ..Default::default()
        };
        let baseline = capture_baseline(&cluster, &store.snapshot(Utc::now()), &policy);
        assert_eq!(baseline.error_count, 0);
        assert_eq!(baseline.total_count, 10);

        set_node_state(&store, "n0", HealthState::Error);
        set_node_state(&store, "n1", HealthState::Error);

        let upgrade_policy = ClusterUpgradeHealthPolicy {
            max_percent_delta_unhealthy_nodes: 10,
            max_percent_upgrade_domain_delta_unhealthy_nodes: 100,
        };
        let ctx = UpgradeHealthContext {
            baseline: &baseline,
            policy: &upgrade_policy,
            current_domain: None,
        };
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, Some(&ctx));
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
        assert!(verdict
            .unhealthy_evaluations
            .iter()
            .any(|e| matches!(e, HealthEvaluation::DeltaNodesCheck { .. })));

        // Without the delta context the absolute evaluation passes.
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, None);
        assert_ne!(verdict.aggregated_health_state, HealthState::Error);
    }

    #[test]
    fn test_upgrade_domain_delta_check() {
        let (cluster, store) = cluster_of_nodes(10); // UD0..UD4, 2 nodes each
        let policy = ClusterHealthPolicy {
            max_percent_unhealthy_nodes: 100,
            ..Default::default()
        };
        let baseline = capture_baseline(&cluster, &store.snapshot(Utc::now()), &policy);

        // n0 lives in UD0; one error of two baseline nodes = 50% delta.
        set_node_state(&store, "n0", HealthState::Error);

        let upgrade_policy = ClusterUpgradeHealthPolicy {
            max_percent_delta_unhealthy_nodes: 100,
            max_percent_upgrade_domain_delta_unhealthy_nodes: 15,
        };
        let ctx = UpgradeHealthContext {
            baseline: &baseline,
            policy: &upgrade_policy,
            current_domain: Some("UD0"),
        };
        let verdict = evaluate_cluster(&cluster, &store.snapshot(Utc::now()), &policy, Some(&ctx));
        assert_eq!(verdict.aggregated_health_state, HealthState::Error);
        assert!(verdict
            .unhealthy_evaluations
            .iter()
            .any(|e| matches!(e, HealthEvaluation::UpgradeDomainDeltaNodesCheck { .. })));
    }
}
