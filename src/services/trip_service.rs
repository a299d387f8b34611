// src/services/trip_service.rs
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::errors::{DispatchError, DispatchResult};
use crate::models::trip::{
    CancellationReason, OfferOutcome, OfferRecord, StateChange, Trip, TripRequest, TripStatus,
};
use crate::services::events::DispatchEvents;
use crate::utils::id_generator::{IdGenerator, IdType};

/// Owns every `Trip` record and its lifecycle. Every state change is a
/// compare-and-swap against the caller's expected state; a stale expectation
/// fails with `StaleStateConflict` and is never silently applied. That is the
/// whole synchronization story: no global lock, no cross-trip transaction.
///
/// Terminal trips are archived (moved out of the active table) but stay
/// readable for history and dispute views.
pub struct TripStateMachine {
    events: Arc<dyn DispatchEvents>,
    active: RwLock<HashMap<String, Trip>>,
    archived: RwLock<HashMap<String, Trip>>,
}

impl TripStateMachine {
    pub fn new(events: Arc<dyn DispatchEvents>) -> Self {
        Self {
            events,
            active: RwLock::new(HashMap::new()),
            archived: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(
        &self,
        request: TripRequest,
        distance_m: f64,
        duration_estimate_secs: f64,
    ) -> Trip {
        let id = IdGenerator::generate(IdType::Trip);
        let trip = Trip::new(id.clone(), request, distance_m, duration_estimate_secs);
        self.active.write().await.insert(id.clone(), trip.clone());
        tracing::info!(
            "trip created: {} ({:.1} km)",
            id,
            distance_m / 1000.0
        );
        trip
    }

    pub async fn get(&self, trip_id: &str) -> DispatchResult<Trip> {
        if let Some(trip) = self.active.read().await.get(trip_id) {
            return Ok(trip.clone());
        }
        if let Some(trip) = self.archived.read().await.get(trip_id) {
            return Ok(trip.clone());
        }
        Err(DispatchError::trip_not_found(trip_id))
    }

    /// Generic CAS transition. Validates both the expectation and the edge,
    /// appends to the audit log, and archives on terminal states.
    pub async fn transition(
        &self,
        trip_id: &str,
        expected: TripStatus,
        next: TripStatus,
    ) -> DispatchResult<Trip> {
        let trip = {
            let mut active = self.active.write().await;
            let trip = active
                .get_mut(trip_id)
                .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;
            Self::apply_transition(trip, expected, next)?;
            let snapshot = trip.clone();
            if next.is_terminal() {
                let trip = active.remove(trip_id).unwrap_or(snapshot.clone());
                self.archived.write().await.insert(trip_id.to_string(), trip);
            }
            snapshot
        };
        self.events.on_trip_state_changed(trip_id, next).await;
        Ok(trip)
    }

    /// Bind one candidate and move `Requested -> Offering`, opening an entry
    /// in the offer history.
    pub async fn begin_offer(&self, trip_id: &str, driver_id: &str) -> DispatchResult<Trip> {
        let trip = {
            let mut active = self.active.write().await;
            let trip = active
                .get_mut(trip_id)
                .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;
            Self::apply_transition(trip, TripStatus::Requested, TripStatus::Offering)?;
            trip.offered_driver = Some(driver_id.to_string());
            trip.offer_history.push(OfferRecord {
                driver_id: driver_id.to_string(),
                offered_at: Utc::now(),
                outcome: None,
                resolved_at: None,
            });
            trip.clone()
        };
        self.events
            .on_trip_state_changed(trip_id, TripStatus::Offering)
            .await;
        Ok(trip)
    }

    /// `Offering -> Accepted`, only for the currently bound candidate. This is
    /// the CAS that makes double-acceptance structurally impossible.
    pub async fn accept_offer(&self, trip_id: &str, driver_id: &str) -> DispatchResult<Trip> {
        let trip = {
            let mut active = self.active.write().await;
            let trip = active
                .get_mut(trip_id)
                .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;

            if trip.status != TripStatus::Offering {
                return Err(DispatchError::stale(format!(
                    "trip {} is {}, expected Offering",
                    trip_id, trip.status
                )));
            }
            if trip.offered_driver.as_deref() != Some(driver_id) {
                return Err(DispatchError::stale(format!(
                    "offer for trip {} is not bound to driver {}",
                    trip_id, driver_id
                )));
            }
            if trip.assigned_driver.is_some() {
                // Unreachable while the CAS discipline holds
                return Err(DispatchError::internal(format!(
                    "trip {} already has an accepted driver",
                    trip_id
                )));
            }

            Self::apply_transition(trip, TripStatus::Offering, TripStatus::Accepted)?;
            trip.offered_driver = None;
            trip.assigned_driver = Some(driver_id.to_string());
            Self::close_open_offer(trip, driver_id, OfferOutcome::Accepted);
            trip.clone()
        };
        self.events
            .on_trip_state_changed(trip_id, TripStatus::Accepted)
            .await;
        Ok(trip)
    }

    /// Close the live offer without acceptance (decline, timeout, or the
    /// candidate dropping off) and put the trip back into dispatch.
    pub async fn resolve_offer(
        &self,
        trip_id: &str,
        driver_id: &str,
        outcome: OfferOutcome,
    ) -> DispatchResult<Trip> {
        let trip = {
            let mut active = self.active.write().await;
            let trip = active
                .get_mut(trip_id)
                .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;

            if trip.status != TripStatus::Offering
                || trip.offered_driver.as_deref() != Some(driver_id)
            {
                return Err(DispatchError::stale(format!(
                    "no live offer for trip {} bound to driver {}",
                    trip_id, driver_id
                )));
            }

            Self::apply_transition(trip, TripStatus::Offering, TripStatus::Requested)?;
            trip.offered_driver = None;
            Self::close_open_offer(trip, driver_id, outcome);
            trip.clone()
        };
        self.events
            .on_trip_state_changed(trip_id, TripStatus::Requested)
            .await;
        Ok(trip)
    }

    /// Cancel from any state that still allows it. `InProgress` and terminal
    /// states reject the request.
    pub async fn cancel(
        &self,
        trip_id: &str,
        reason: CancellationReason,
    ) -> DispatchResult<Trip> {
        let trip = {
            let mut active = self.active.write().await;
            let trip = active
                .get_mut(trip_id)
                .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;
            let current = trip.status;
            Self::apply_transition(trip, current, TripStatus::Cancelled)?;
            trip.offered_driver = None;
            trip.cancellation_reason = Some(reason);
            let snapshot = trip.clone();
            active.remove(trip_id);
            self.archived
                .write()
                .await
                .insert(trip_id.to_string(), snapshot.clone());
            snapshot
        };
        tracing::info!("trip {} cancelled: {:?}", trip_id, reason);
        self.events
            .on_trip_state_changed(trip_id, TripStatus::Cancelled)
            .await;
        Ok(trip)
    }

    /// Trips (active and archived) assigned to a driver, newest first. Backs
    /// the driver's history view.
    pub async fn trips_for_driver(&self, driver_id: &str) -> Vec<Trip> {
        let mut trips: Vec<Trip> = Vec::new();
        for trip in self.active.read().await.values() {
            if trip.assigned_driver.as_deref() == Some(driver_id) {
                trips.push(trip.clone());
            }
        }
        for trip in self.archived.read().await.values() {
            if trip.assigned_driver.as_deref() == Some(driver_id) {
                trips.push(trip.clone());
            }
        }
        trips.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        trips
    }

    fn apply_transition(trip: &mut Trip, expected: TripStatus, next: TripStatus) -> DispatchResult<()> {
        if trip.status != expected {
            return Err(DispatchError::stale(format!(
                "trip {} is {}, expected {}",
                trip.id, trip.status, expected
            )));
        }
        if !expected.can_transition_to(next) {
            tracing::warn!(
                "rejected trip transition for {}: {} -> {}",
                trip.id,
                expected,
                next
            );
            return Err(DispatchError::InvalidTripTransition {
                from: expected.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        trip.status = next;
        trip.state_history.push(StateChange {
            from: expected,
            to: next,
            at: now,
        });
        match next {
            TripStatus::Accepted => trip.accepted_at = Some(now),
            TripStatus::InProgress => trip.started_at = Some(now),
            TripStatus::Completed => trip.completed_at = Some(now),
            TripStatus::Cancelled => trip.cancelled_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    fn close_open_offer(trip: &mut Trip, driver_id: &str, outcome: OfferOutcome) {
        if let Some(record) = trip
            .offer_history
            .iter_mut()
            .rev()
            .find(|r| r.driver_id == driver_id && r.outcome.is_none())
        {
            record.outcome = Some(outcome);
            record.resolved_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::GeoPoint;
    use crate::services::events::LoggingEvents;

    fn machine() -> TripStateMachine {
        TripStateMachine::new(Arc::new(LoggingEvents))
    }

    fn request() -> TripRequest {
        TripRequest {
            pickup: GeoPoint::new(5.6037, -0.1870),
            dropoff: GeoPoint::new(5.5560, -0.1969),
        }
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_expectation() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;

        let err = machine
            .transition(&trip.id, TripStatus::Accepted, TripStatus::EnRoute)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleStateConflict(_)));
        // Never silently applied
        assert_eq!(machine.get(&trip.id).await.unwrap().status, TripStatus::Requested);
    }

    #[tokio::test]
    async fn test_illegal_edge_rejected() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;

        let err = machine
            .transition(&trip.id, TripStatus::Requested, TripStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTripTransition { .. }));
    }

    #[tokio::test]
    async fn test_accept_requires_bound_driver() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;
        machine.begin_offer(&trip.id, "drv-a").await.unwrap();

        // A driver who was never offered the trip cannot accept it
        let err = machine.accept_offer(&trip.id, "drv-b").await.unwrap_err();
        assert!(matches!(err, DispatchError::StaleStateConflict(_)));

        let trip = machine.accept_offer(&trip.id, "drv-a").await.unwrap();
        assert_eq!(trip.status, TripStatus::Accepted);
        assert_eq!(trip.assigned_driver.as_deref(), Some("drv-a"));
        assert!(trip.offered_driver.is_none());
    }

    #[tokio::test]
    async fn test_offer_history_is_appended() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;

        machine.begin_offer(&trip.id, "drv-a").await.unwrap();
        machine
            .resolve_offer(&trip.id, "drv-a", OfferOutcome::Declined)
            .await
            .unwrap();
        machine.begin_offer(&trip.id, "drv-b").await.unwrap();
        let trip = machine.accept_offer(&trip.id, "drv-b").await.unwrap();

        assert_eq!(trip.offer_history.len(), 2);
        assert_eq!(trip.offer_history[0].outcome, Some(OfferOutcome::Declined));
        assert_eq!(trip.offer_history[1].outcome, Some(OfferOutcome::Accepted));
        // At most one accepted entry, ever
        let accepted = trip
            .offer_history
            .iter()
            .filter(|r| r.outcome == Some(OfferOutcome::Accepted))
            .count();
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_audit_log_per_transition() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;
        machine.begin_offer(&trip.id, "drv-a").await.unwrap();
        machine.accept_offer(&trip.id, "drv-a").await.unwrap();
        machine
            .transition(&trip.id, TripStatus::Accepted, TripStatus::EnRoute)
            .await
            .unwrap();
        machine
            .transition(&trip.id, TripStatus::EnRoute, TripStatus::InProgress)
            .await
            .unwrap();
        let trip = machine
            .transition(&trip.id, TripStatus::InProgress, TripStatus::Completed)
            .await
            .unwrap();

        let states: Vec<TripStatus> = trip.state_history.iter().map(|c| c.to).collect();
        assert_eq!(
            states,
            vec![
                TripStatus::Offering,
                TripStatus::Accepted,
                TripStatus::EnRoute,
                TripStatus::InProgress,
                TripStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_cancellation_once_in_progress() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;
        machine.begin_offer(&trip.id, "drv-a").await.unwrap();
        machine.accept_offer(&trip.id, "drv-a").await.unwrap();
        machine
            .transition(&trip.id, TripStatus::Accepted, TripStatus::EnRoute)
            .await
            .unwrap();
        machine
            .transition(&trip.id, TripStatus::EnRoute, TripStatus::InProgress)
            .await
            .unwrap();

        let err = machine
            .cancel(&trip.id, CancellationReason::RequesterCancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTripTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_trips_archived_but_readable() {
        let machine = machine();
        let trip = machine.create(request(), 5_000.0, 600.0).await;
        machine
            .cancel(&trip.id, CancellationReason::RequesterCancelled)
            .await
            .unwrap();

        let archived = machine.get(&trip.id).await.unwrap();
        assert_eq!(archived.status, TripStatus::Cancelled);
        assert_eq!(
            archived.cancellation_reason,
            Some(CancellationReason::RequesterCancelled)
        );

        // Terminal means terminal
        let err = machine
            .transition(&trip.id, TripStatus::Cancelled, TripStatus::Requested)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TripNotFound(_)));
    }
}
