//! Health event store.
//!
//! Holds the current set of reported events per entity. Writes are
//! serialized behind a lock; readers take owned copy-on-read snapshots so
//! ad hoc health queries and the upgrade loop see a consistent point in
//! time without blocking reporters.

use crate::health::event::{HealthEvent, HealthEventView, HealthState};
use crate::model::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Errors from reporting into the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthStoreError {
    /// The report is malformed and was rejected before any state change.
    InvalidReport(String),
    /// A report with a sequence number at or below the active one.
    StaleReport {
        entity: String,
        source_id: String,
        property: String,
        reported: u64,
        active: u64,
    },
    /// Stored sequence numbers are no longer monotonic. Store invariant
    /// violation; must halt, never repaired in place.
    SequenceCorruption {
        entity: String,
        source_id: String,
        property: String,
    },
}

impl std::fmt::Display for HealthStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStoreError::InvalidReport(msg) => write!(f, "invalid health report: {}", msg),
            HealthStoreError::StaleReport {
                entity,
                source_id,
                property,
                reported,
                active,
            } => write!(
                f,
                "stale health report for {} ({}:{}): sequence {} <= active {}",
                entity, source_id, property, reported, active
            ),
            HealthStoreError::SequenceCorruption {
                entity,
                source_id,
                property,
            } => write!(
                f,
                "sequence corruption for {} ({}:{})",
                entity, source_id, property
            ),
        }
    }
}

impl std::error::Error for HealthStoreError {}

/// Key for the active-event map: one slot per (source, property).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct EventKey {
    source_id: String,
    property: String,
}

#[derive(Default)]
struct StoreInner {
    /// Entity → (source, property) → active event.
    events: HashMap<EntityId, HashMap<EventKey, HealthEvent>>,

    /// Highest accepted sequence per slot. Survives expiry sweeps so a
    /// swept slot cannot silently accept an older sequence again.
    floors: HashMap<EntityId, HashMap<EventKey, u64>>,

    /// Bumped on every accepted write; snapshots carry it.
    version: u64,
}

/// Point-in-time copy of the store, with expiry applied.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    events: HashMap<EntityId, Vec<HealthEventView>>,
}

impl HealthSnapshot {
    /// Events (active and stale) for an entity. Empty slice when none.
    pub fn events_for(&self, entity: &EntityId) -> &[HealthEventView] {
        self.events.get(entity).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether the snapshot holds any events for an entity.
    pub fn has_events(&self, entity: &EntityId) -> bool {
        self.events.get(entity).map_or(false, |v| !v.is_empty())
    }
}

/// Append-only health event store with TTL expiry.
pub struct HealthStore {
    inner: RwLock<StoreInner>,
}

impl HealthStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Report a health event against an entity.
    ///
    /// Only a strictly higher sequence number replaces the active event for
    /// the same (source, property) slot; anything else is a stale report.
    /// The monotonicity floor outlives the event itself: a sequence at or
    /// below the highest ever accepted stays stale even after the event
    /// expired and was swept.
    pub fn report(&self, entity: EntityId, event: HealthEvent) -> Result<(), HealthStoreError> {
        if event.source_id.is_empty() {
            return Err(HealthStoreError::InvalidReport(
                "sourceId must not be empty".to_string(),
            ));
        }
        if event.property.is_empty() {
            return Err(HealthStoreError::InvalidReport(
                "property must not be empty".to_string(),
            ));
        }
        if event.time_to_live_in_milliseconds == Some(0) {
            return Err(HealthStoreError::InvalidReport(
                "timeToLive must be positive".to_string(),
            ));
        }
        if event.health_state == HealthState::Unknown {
            return Err(HealthStoreError::InvalidReport(
                "cannot report Unknown health state".to_string(),
            ));
        }

        let key = EventKey {
            source_id: event.source_id.clone(),
            property: event.property.clone(),
        };

        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;
        let floor = inner
            .floors
            .get(&entity)
            .and_then(|slots| slots.get(&key))
            .copied()
            .unwrap_or(0);
        if let Some(active) = inner.events.get(&entity).and_then(|s| s.get(&key)) {
            // The active event can never sit below the accepted floor; if it
            // does, the store has lost writes.
            if active.sequence_number < floor {
                return Err(HealthStoreError::SequenceCorruption {
                    entity: entity.to_string(),
                    source_id: key.source_id,
                    property: key.property,
                });
            }
        }
        if event.sequence_number <= floor {
            return Err(HealthStoreError::StaleReport {
                entity: entity.to_string(),
                source_id: key.source_id,
                property: key.property,
                reported: event.sequence_number,
                active: floor,
            });
        }
        inner
            .floors
            .entry(entity.clone())
            .or_default()
            .insert(key.clone(), event.sequence_number);
        inner.events.entry(entity).or_default().insert(key, event);
        inner.version += 1;
        Ok(())
    }

    /// Take an owned, consistent snapshot with expiry applied at `now`.
    ///
    /// Expired removable events are omitted; expired retained events are
    /// included with `stale = true`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let inner = self.inner.read().unwrap();
        let mut events: HashMap<EntityId, Vec<HealthEventView>> = HashMap::new();
        for (entity, slots) in &inner.events {
            let mut views: Vec<HealthEventView> = Vec::new();
            for event in slots.values() {
                let expired = event.is_expired(now);
                if expired && event.remove_when_expired {
                    continue;
                }
                views.push(HealthEventView {
                    event: event.clone(),
                    stale: expired,
                });
            }
            // Deterministic order so repeated evaluations are identical.
            views.sort_by(|a, b| {
                (&a.event.source_id, &a.event.property)
                    .cmp(&(&b.event.source_id, &b.event.property))
            });
            if !views.is_empty() {
                events.insert(entity.clone(), views);
            }
        }
        HealthSnapshot {
            version: inner.version,
            taken_at: now,
            events,
        }
    }

    /// Physically remove expired events marked removeWhenExpired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().unwrap();
        let mut removed = 0;
        for slots in inner.events.values_mut() {
            let before = slots.len();
            slots.retain(|_, e| !(e.remove_when_expired && e.is_expired(now)));
            removed += before - slots.len();
        }
        inner.events.retain(|_, slots| !slots.is_empty());
        if removed > 0 {
            inner.version += 1;
        }
        removed
    }
}

impl Default for HealthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeName;

    fn event(seq: u64, state: HealthState) -> HealthEvent {
        HealthEvent {
            source_id: "watchdog".to_string(),
            property: "Disk".to_string(),
            health_state: state,
            sequence_number: seq,
            time_to_live_in_milliseconds: None,
            description: String::new(),
            remove_when_expired: false,
            source_utc_timestamp: Utc::now(),
        }
    }

    fn node_entity() -> EntityId {
        EntityId::Node(NodeName::new("n1"))
    }

    #[test]
    fn test_higher_sequence_replaces_active() {
        let store = HealthStore::new();
        store.report(node_entity(), event(1, HealthState::Ok)).unwrap();
        store.report(node_entity(), event(2, HealthState::Error)).unwrap();

        let snapshot = store.snapshot(Utc::now());
        let views = snapshot.events_for(&node_entity());
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].event.sequence_number, 2);
        assert_eq!(views[0].event.health_state, HealthState::Error);
    }

    #[test]
    fn test_stale_report_rejected() {
        let store = HealthStore::new();
        store.report(node_entity(), event(5, HealthState::Ok)).unwrap();

        let err = store.report(node_entity(), event(5, HealthState::Error)).unwrap_err();
        assert!(matches!(err, HealthStoreError::StaleReport { reported: 5, active: 5, .. }));

        let err = store.report(node_entity(), event(3, HealthState::Error)).unwrap_err();
        assert!(matches!(err, HealthStoreError::StaleReport { reported: 3, .. }));
    }

    #[test]
    fn test_invalid_reports_rejected() {
        let store = HealthStore::new();

        let mut bad = event(1, HealthState::Ok);
        bad.source_id.clear();
        assert!(matches!(
            store.report(node_entity(), bad),
            Err(HealthStoreError::InvalidReport(_))
        ));

        let mut bad = event(1, HealthState::Ok);
        bad.time_to_live_in_milliseconds = Some(0);
        assert!(matches!(
            store.report(node_entity(), bad),
            Err(HealthStoreError::InvalidReport(_))
        ));

        assert!(matches!(
            store.report(node_entity(), event(1, HealthState::Unknown)),
            Err(HealthStoreError::InvalidReport(_))
        ));
    }

    #[test]
    fn test_expired_removable_event_omitted_from_snapshot() {
        let store = HealthStore::new();
        let mut e = event(1, HealthState::Error);
        e.time_to_live_in_milliseconds = Some(1000);
        e.remove_when_expired = true;
        e.source_utc_timestamp = Utc::now() - chrono::Duration::seconds(10);
        store.report(node_entity(), e).unwrap();

        let snapshot = store.snapshot(Utc::now());
        assert!(!snapshot.has_events(&node_entity()));
    }

    #[test]
    fn test_expired_retained_event_flagged_stale() {
        let store = HealthStore::new();
        let mut e = event(1, HealthState::Warning);
        e.time_to_live_in_milliseconds = Some(1000);
        e.remove_when_expired = false;
        e.source_utc_timestamp = Utc::now() - chrono::Duration::seconds(10);
        store.report(node_entity(), e).unwrap();

        let snapshot = store.snapshot(Utc::now());
        let views = snapshot.events_for(&node_entity());
        assert_eq!(views.len(), 1);
        assert!(views[0].stale);
        assert_eq!(views[0].event.health_state, HealthState::Warning);
    }

    #[test]
    fn test_sweep_removes_only_expired_removable() {
        let store = HealthStore::new();
        let now = Utc::now();

        let mut removable = event(1, HealthState::Ok);
        removable.property = "A".to_string();
        removable.time_to_live_in_milliseconds = Some(100);
        removable.remove_when_expired = true;
        removable.source_utc_timestamp = now - chrono::Duration::seconds(5);
        store.report(node_entity(), removable).unwrap();

        let mut retained = event(1, HealthState::Ok);
        retained.property = "B".to_string();
        retained.time_to_live_in_milliseconds = Some(100);
        retained.remove_when_expired = false;
        retained.source_utc_timestamp = now - chrono::Duration::seconds(5);
        store.report(node_entity(), retained).unwrap();

        assert_eq!(store.sweep_expired(now), 1);
        let snapshot = store.snapshot(now);
        assert_eq!(snapshot.events_for(&node_entity()).len(), 1);
    }

    #[test]
    fn test_sequence_floor_survives_expiry_sweep() {
        let store = HealthStore::new();
        let mut e = event(7, HealthState::Ok);
        e.time_to_live_in_milliseconds = Some(100);
        e.remove_when_expired = true;
        e.source_utc_timestamp = Utc::now() - chrono::Duration::seconds(5);
        store.report(node_entity(), e).unwrap();
        assert_eq!(store.sweep_expired(Utc::now()), 1);

        // The slot is gone but its accepted floor is not: an older sequence
        // stays stale.
        let err = store
            .report(node_entity(), event(5, HealthState::Error))
            .unwrap_err();
        assert!(matches!(
            err,
            HealthStoreError::StaleReport { reported: 5, active: 7, .. }
        ));
        store.report(node_entity(), event(8, HealthState::Error)).unwrap();
    }
}
