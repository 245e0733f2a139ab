//! Health states and reported health events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated health verdict for an entity or event.
///
/// Ok < Warning < Error form a severity order. Unknown is incomparable and
/// appears only when no data exists for an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Ok,
    Warning,
    Error,
    Unknown,
}

impl HealthState {
    /// Merge two states into the more severe one. Unknown loses to any
    /// concrete state: once real data exists, absence elsewhere is no longer
    /// the verdict.
    pub fn merge(self, other: HealthState) -> HealthState {
        use HealthState::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Warning, _) | (_, Warning) => Warning,
            (Ok, _) | (_, Ok) => Ok,
            (Unknown, Unknown) => Unknown,
        }
    }

    /// Whether this state counts as unhealthy under the given policy knob.
    /// Unknown counts as unhealthy: absence of data is not evidence of health.
    pub fn is_unhealthy(self, consider_warning_as_error: bool) -> bool {
        match self {
            HealthState::Error | HealthState::Unknown => true,
            HealthState::Warning => consider_warning_as_error,
            HealthState::Ok => false,
        }
    }

    /// Apply the considerWarningAsError promotion to an event-level state.
    pub fn promoted(self, consider_warning_as_error: bool) -> HealthState {
        if consider_warning_as_error && self == HealthState::Warning {
            HealthState::Error
        } else {
            self
        }
    }
}

/// A single health report against an entity.
///
/// For a given (entity, sourceId, property) key only the event with the
/// highest sequence number is active. Events past their TTL are expired:
/// removed if `remove_when_expired`, otherwise retained as stale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    /// Identifier of the reporting component.
    pub source_id: String,

    /// What aspect of the entity the report is about.
    pub property: String,

    pub health_state: HealthState,

    /// Monotonic per (source, property).
    pub sequence_number: u64,

    /// None means the report never expires.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_to_live_in_milliseconds: Option<u64>,

    #[serde(default)]
    pub description: String,

    /// If true the event vanishes on expiry; if false it lingers as the
    /// last known state, flagged stale.
    #[serde(default)]
    pub remove_when_expired: bool,

    pub source_utc_timestamp: DateTime<Utc>,
}

impl HealthEvent {
    /// Whether the event's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.time_to_live_in_milliseconds {
            None => false,
            Some(ttl_ms) => {
                let ttl = Duration::milliseconds(ttl_ms.min(i64::MAX as u64) as i64);
                self.source_utc_timestamp + ttl <= now
            }
        }
    }
}

/// An event as seen through a store snapshot: the event plus expiry flags
/// computed at snapshot time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEventView {
    #[serde(flatten)]
    pub event: HealthEvent,

    /// Expired but retained (removeWhenExpired was false). Still counts as
    /// last known state; evaluations flag it.
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_severity_order() {
        use HealthState::*;
        assert_eq!(Ok.merge(Warning), Warning);
        assert_eq!(Warning.merge(Error), Error);
        assert_eq!(Ok.merge(Ok), Ok);
        assert_eq!(Unknown.merge(Unknown), Unknown);
        // Concrete data wins over Unknown
        assert_eq!(Unknown.merge(Ok), Ok);
        assert_eq!(Unknown.merge(Error), Error);
    }

    #[test]
    fn test_warning_promotion() {
        assert_eq!(
            HealthState::Warning.promoted(true),
            HealthState::Error
        );
        assert_eq!(
            HealthState::Warning.promoted(false),
            HealthState::Warning
        );
        assert_eq!(HealthState::Ok.promoted(true), HealthState::Ok);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let event = HealthEvent {
            source_id: "watchdog".to_string(),
            property: "Disk".to_string(),
            health_state: HealthState::Warning,
            sequence_number: 1,
            time_to_live_in_milliseconds: Some(1000),
            description: String::new(),
            remove_when_expired: true,
            source_utc_timestamp: now - Duration::milliseconds(2000),
        };
        assert!(event.is_expired(now));

        let fresh = HealthEvent {
            source_utc_timestamp: now,
            ..event.clone()
        };
        assert!(!fresh.is_expired(now));

        let immortal = HealthEvent {
            time_to_live_in_milliseconds: None,
            source_utc_timestamp: now - Duration::days(365),
            ..event
        };
        assert!(!immortal.is_expired(now));
    }
}
