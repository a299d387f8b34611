// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One GPS fix. Immutable once created; newer samples supersede older ones
/// rather than mutating them.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    /// Monotonic per-driver sequence number; out-of-order samples are rejected.
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityState {
    Offline, // Driver is logged out of dispatch
    Idle,    // Available, visible to the matcher
    Offered, // Bound to an in-flight offer
    OnTrip,  // Serving an accepted trip
}

impl AvailabilityState {
    /// Legal edges of the availability state machine. `OnTrip -> Idle` is
    /// listed here but additionally guarded by the session manager: it only
    /// applies once the active trip reference has been cleared.
    pub fn can_transition_to(&self, next: AvailabilityState) -> bool {
        use AvailabilityState::*;
        matches!(
            (self, next),
            (Offline, Idle)
                | (Idle, Offline)
                | (Idle, Offered)
                | (Offered, Idle)
                | (Offered, OnTrip)
                | (Offered, Offline)
                | (OnTrip, Idle)
        )
    }
}

impl std::fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AvailabilityState::Offline => "Offline",
            AvailabilityState::Idle => "Idle",
            AvailabilityState::Offered => "Offered",
            AvailabilityState::OnTrip => "OnTrip",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Driver {
    pub id: String,
    pub availability: AvailabilityState,
    pub current_location: Option<LocationSample>,
    pub active_trip_id: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Whether the session currently has connectivity. A disconnected driver
    /// is never a dispatch candidate and has inbound actions queued for replay.
    pub connected: bool,
    pub registered_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(id: String) -> Self {
        Self {
            id,
            availability: AvailabilityState::Offline,
            current_location: None,
            active_trip_id: None,
            last_seen: None,
            connected: true,
            registered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_edges() {
        use AvailabilityState::*;
        assert!(Offline.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Offered));
        assert!(Offered.can_transition_to(OnTrip));
        assert!(Offered.can_transition_to(Idle));
        assert!(OnTrip.can_transition_to(Idle));

        assert!(!Offline.can_transition_to(Offered));
        assert!(!Offline.can_transition_to(OnTrip));
        assert!(!Idle.can_transition_to(OnTrip));
        assert!(!OnTrip.can_transition_to(Offline));
    }

    #[test]
    fn test_new_driver_starts_offline() {
        let driver = Driver::new("drv-250829-abc123".to_string());
        assert_eq!(driver.availability, AvailabilityState::Offline);
        assert!(driver.connected);
        assert!(driver.active_trip_id.is_none());
    }
}
