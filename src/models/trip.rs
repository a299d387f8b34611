// src/models/trip.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::driver::GeoPoint;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Requested,  // Created, waiting for dispatch
    Offering,   // Bound to exactly one candidate with a live offer timer
    Accepted,   // A driver accepted the offer
    EnRoute,    // Driver heading to pickup
    InProgress, // Rider on board
    Completed,  // Terminal
    Cancelled,  // Terminal
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Legal edges of the trip state machine. `Offering -> Requested` is the
    /// decline/timeout path back into dispatch; cancellation is reachable from
    /// every pre-pickup state but not once the trip is in progress.
    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, next),
            (Requested, Offering)
                | (Requested, Cancelled)
                | (Offering, Accepted)
                | (Offering, Requested)
                | (Offering, Cancelled)
                | (Accepted, EnRoute)
                | (Accepted, Cancelled)
                | (EnRoute, InProgress)
                | (EnRoute, Cancelled)
                | (InProgress, Completed)
        )
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TripStatus::Requested => "Requested",
            TripStatus::Offering => "Offering",
            TripStatus::Accepted => "Accepted",
            TripStatus::EnRoute => "EnRoute",
            TripStatus::InProgress => "InProgress",
            TripStatus::Completed => "Completed",
            TripStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    NoDriversAvailable,
    RequesterCancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    Declined,
    TimedOut,
    Disconnected,
}

/// One entry of the per-trip offer history (append-only audit trail).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OfferRecord {
    pub driver_id: String,
    pub offered_at: DateTime<Utc>,
    pub outcome: Option<OfferOutcome>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One entry of the per-trip state audit log, appended on every successful
/// transition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateChange {
    pub from: TripStatus,
    pub to: TripStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Trip {
    pub id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub requested_at: DateTime<Utc>,
    pub status: TripStatus,

    /// Candidate currently bound by a live offer, if any.
    pub offered_driver: Option<String>,
    /// The driver who accepted; at most one, ever.
    pub assigned_driver: Option<String>,
    pub cancellation_reason: Option<CancellationReason>,

    // Fare base parameters, fixed at request time
    pub distance_m: f64,
    pub duration_estimate_secs: f64,

    pub offer_history: Vec<OfferRecord>,
    pub state_history: Vec<StateChange>,

    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn new(id: String, request: TripRequest, distance_m: f64, duration_estimate_secs: f64) -> Self {
        Self {
            id,
            pickup: request.pickup,
            dropoff: request.dropoff,
            requested_at: Utc::now(),
            status: TripStatus::Requested,
            offered_driver: None,
            assigned_driver: None,
            cancellation_reason: None,
            distance_m,
            duration_estimate_secs,
            offer_history: Vec::new(),
            state_history: Vec::new(),
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Drivers that have already seen an offer for this trip; never re-offered
    /// in later expansion rounds.
    pub fn offered_driver_ids(&self) -> Vec<&str> {
        self.offer_history
            .iter()
            .map(|r| r.driver_id.as_str())
            .collect()
    }
}

/// Compact view handed to the presentation collaborator with an offer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripSummary {
    pub trip_id: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub distance_km: f64,
    pub estimated_fare: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TripStatus::Completed.is_terminal());
        assert!(TripStatus::Cancelled.is_terminal());
        assert!(!TripStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_trip_edges() {
        use TripStatus::*;
        assert!(Requested.can_transition_to(Offering));
        assert!(Offering.can_transition_to(Accepted));
        assert!(Offering.can_transition_to(Requested));
        assert!(Offering.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));

        // No cancellation once the rider is on board
        assert!(!InProgress.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        // No skipping straight to acceptance
        assert!(!Requested.can_transition_to(Accepted));
    }
}
