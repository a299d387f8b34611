// src/state.rs
//
// Service wiring plus the inbound boundary of the engine. Hosts (transport,
// presentation, storage collaborators) talk to `AppState`; everything behind
// it is reached only through the owning service's CAS API.
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::driver::{AvailabilityState, Driver, GeoPoint, LocationSample};
use crate::models::earnings::{DriverEarningsSummary, EarningsEntry};
use crate::models::offline::{QueuedAction, ReplayReport};
use crate::models::trip::{CancellationReason, Trip, TripRequest, TripStatus};
use crate::services::dispatch_service::{DispatchMatcher, OfferDecision};
use crate::services::earnings_service::EarningsLedger;
use crate::services::events::DispatchEvents;
use crate::services::location_service::LocationTracker;
use crate::services::offline_service::OfflineReconciler;
use crate::services::session_service::DriverSessionManager;
use crate::services::trip_service::TripStateMachine;
use crate::utils::geo;

pub struct AppState {
    pub config: Arc<DispatchConfig>,
    pub location_tracker: Arc<LocationTracker>,
    pub session_manager: Arc<DriverSessionManager>,
    pub trip_machine: Arc<TripStateMachine>,
    pub dispatch_matcher: Arc<DispatchMatcher>,
    pub earnings_ledger: Arc<EarningsLedger>,
    pub offline_reconciler: Arc<OfflineReconciler>,
    pub events: Arc<dyn DispatchEvents>,
}

impl AppState {
    pub fn new(config: DispatchConfig, events: Arc<dyn DispatchEvents>) -> Self {
        let config = Arc::new(config);
        let location_tracker = Arc::new(LocationTracker::new(config.clone()));
        let session_manager = Arc::new(DriverSessionManager::new(
            config.clone(),
            location_tracker.clone(),
        ));
        let trip_machine = Arc::new(TripStateMachine::new(events.clone()));
        let dispatch_matcher = Arc::new(DispatchMatcher::new(
            config.clone(),
            session_manager.clone(),
            trip_machine.clone(),
            events.clone(),
        ));
        let earnings_ledger = Arc::new(EarningsLedger::new(
            config.clone(),
            trip_machine.clone(),
            events.clone(),
        ));
        let offline_reconciler = Arc::new(OfflineReconciler::new(config.clone(), events.clone()));

        Self {
            config,
            location_tracker,
            session_manager,
            trip_machine,
            dispatch_matcher,
            earnings_ledger,
            offline_reconciler,
            events,
        }
    }

    // ---- rider-side operations ------------------------------------------

    /// Create a trip and kick off dispatch in the background. Returns the trip
    /// id immediately; progress is reported through the outbound callbacks.
    pub async fn submit_trip_request(&self, pickup: GeoPoint, dropoff: GeoPoint) -> String {
        let distance_m = geo::distance_meters(pickup, dropoff);
        let duration_secs = geo::eta_seconds(distance_m, self.config.assumed_speed_mps());
        let trip = self
            .trip_machine
            .create(TripRequest { pickup, dropoff }, distance_m, duration_secs)
            .await;

        let matcher = self.dispatch_matcher.clone();
        let trip_id = trip.id.clone();
        tokio::spawn(async move {
            if let Err(err) = matcher.dispatch_trip(&trip_id).await {
                tracing::warn!("dispatch for {} ended with error: {}", trip_id, err);
            }
        });
        trip.id
    }

    /// Requester cancellation. Valid from any state before the rider is on
    /// board; releases whichever driver was offered or assigned.
    pub async fn cancel_trip(&self, trip_id: &str) -> DispatchResult<Trip> {
        let trip = self
            .dispatch_matcher
            .cancel_trip(trip_id, CancellationReason::RequesterCancelled)
            .await?;
        // Release whichever driver the cancelled snapshot still names; a
        // pre-cancel read could miss an acceptance landing just before the CAS
        if let Some(driver_id) = trip.assigned_driver.as_deref() {
            if let Err(err) = self.session_manager.finish_trip(driver_id, trip_id).await {
                tracing::debug!("release after cancel skipped for {}: {}", driver_id, err);
            }
        }
        Ok(trip)
    }

    // ---- driver-side operations -----------------------------------------

    pub async fn register_driver(&self) -> Driver {
        self.session_manager.register().await
    }

    pub async fn register_driver_with_id(&self, driver_id: &str) -> DispatchResult<Driver> {
        self.session_manager.register_with_id(driver_id).await
    }

    /// Logout/session expiry: the driver record, location track, and any
    /// unreplayed offline queue are destroyed.
    pub async fn remove_driver(&self, driver_id: &str) -> DispatchResult<()> {
        self.session_manager.remove(driver_id).await?;
        self.offline_reconciler.clear(driver_id).await;
        Ok(())
    }

    pub async fn go_online(&self, driver_id: &str) -> DispatchResult<Driver> {
        self.session_manager
            .set_availability(driver_id, AvailabilityState::Idle)
            .await
    }

    pub async fn go_offline(&self, driver_id: &str) -> DispatchResult<Driver> {
        self.session_manager
            .set_availability(driver_id, AvailabilityState::Offline)
            .await
    }

    pub async fn report_location(
        &self,
        driver_id: &str,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        accuracy_m: f64,
        seq: u64,
    ) -> DispatchResult<()> {
        let sample = LocationSample {
            point: GeoPoint::new(latitude, longitude),
            accuracy_m,
            timestamp,
            seq,
        };
        self.route_action(driver_id, QueuedAction::LocationPing(sample))
            .await
    }

    pub async fn respond_to_offer(
        &self,
        driver_id: &str,
        trip_id: &str,
        decision: OfferDecision,
    ) -> DispatchResult<()> {
        self.route_action(
            driver_id,
            QueuedAction::OfferResponse {
                trip_id: trip_id.to_string(),
                accept: decision == OfferDecision::Accept,
            },
        )
        .await
    }

    /// Driver is heading to the pickup point.
    pub async fn mark_en_route(&self, driver_id: &str, trip_id: &str) -> DispatchResult<Trip> {
        self.verify_assigned(driver_id, trip_id).await?;
        self.trip_machine
            .transition(trip_id, TripStatus::Accepted, TripStatus::EnRoute)
            .await
    }

    /// Rider picked up; the trip is underway.
    pub async fn start_trip(&self, driver_id: &str, trip_id: &str) -> DispatchResult<Trip> {
        self.verify_assigned(driver_id, trip_id).await?;
        self.trip_machine
            .transition(trip_id, TripStatus::EnRoute, TripStatus::InProgress)
            .await
    }

    /// Completion ack from the driver (or the surrounding transport, which may
    /// deliver it more than once). Routed through the offline queue when the
    /// driver has no connectivity.
    pub async fn mark_trip_completed(&self, trip_id: &str) -> DispatchResult<()> {
        let trip = self.trip_machine.get(trip_id).await?;
        let driver_id = trip
            .assigned_driver
            .clone()
            .ok_or_else(|| DispatchError::stale(format!("trip {} has no assigned driver", trip_id)))?;
        self.route_action(
            &driver_id,
            QueuedAction::CompleteTrip {
                trip_id: trip_id.to_string(),
            },
        )
        .await
    }

    // ---- connectivity and reconciliation --------------------------------

    /// Mark the session disconnected. From here on the driver's actions are
    /// buffered for replay; a live offer bound to them resolves as an implicit
    /// decline so the matcher can advance without waiting out the timer.
    pub async fn driver_disconnected(&self, driver_id: &str) -> DispatchResult<Driver> {
        let driver = self.session_manager.set_connected(driver_id, false).await?;
        self.dispatch_matcher.notify_disconnected(driver_id).await;
        Ok(driver)
    }

    /// Reconnect and replay the offline queue strictly in sequence order.
    /// Stale actions fail their CAS and land in the report's conflicts;
    /// expired ones are dropped and reported, never applied.
    pub async fn driver_reconnected(&self, driver_id: &str) -> DispatchResult<ReplayReport> {
        self.session_manager.set_connected(driver_id, true).await?;

        let (ready, expired) = self.offline_reconciler.drain(driver_id).await;
        let mut report = ReplayReport::default();
        report.expired = expired.iter().map(|i| i.seq).collect();

        for item in ready {
            match self.apply_action(driver_id, item.action.clone()).await {
                Ok(()) => report.applied.push(item.seq),
                Err(err) => {
                    tracing::info!(
                        "replay conflict for {} seq {}: {}",
                        driver_id,
                        item.seq,
                        err
                    );
                    report.conflicts.push((item.seq, err));
                }
            }
        }
        tracing::info!(
            "replay for {}: {} applied, {} expired, {} conflicts",
            driver_id,
            report.applied.len(),
            report.expired.len(),
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Route a driver action to the live path or, while disconnected, into the
    /// offline queue.
    async fn route_action(&self, driver_id: &str, action: QueuedAction) -> DispatchResult<()> {
        // Unknown drivers are rejected rather than queued
        let driver = self.session_manager.get(driver_id).await?;
        if !driver.connected {
            self.offline_reconciler.enqueue(driver_id, action).await;
            return Ok(());
        }
        self.apply_action(driver_id, action).await
    }

    /// The single application path shared by live calls and queue replay, so
    /// a replayed action meets exactly the same CAS contracts as a live one.
    async fn apply_action(&self, driver_id: &str, action: QueuedAction) -> DispatchResult<()> {
        match action {
            QueuedAction::LocationPing(sample) => {
                self.session_manager.update_location(driver_id, sample).await?;
                Ok(())
            }
            QueuedAction::OfferResponse { trip_id, accept } => {
                let decision = if accept {
                    OfferDecision::Accept
                } else {
                    OfferDecision::Decline
                };
                self.dispatch_matcher
                    .respond_to_offer(driver_id, &trip_id, decision)
                    .await?;
                Ok(())
            }
            QueuedAction::CompleteTrip { trip_id } => {
                self.complete_trip_for(driver_id, &trip_id).await
            }
            QueuedAction::Availability(target) => {
                self.session_manager.set_availability(driver_id, target).await?;
                Ok(())
            }
        }
    }

    /// Completion flow: trip CAS, idempotent fare accrual, driver release.
    async fn complete_trip_for(&self, driver_id: &str, trip_id: &str) -> DispatchResult<()> {
        let trip = self.trip_machine.get(trip_id).await?;
        if trip.assigned_driver.as_deref() != Some(driver_id) {
            return Err(DispatchError::stale(format!(
                "trip {} is not assigned to driver {}",
                trip_id, driver_id
            )));
        }

        match trip.status {
            TripStatus::InProgress => {
                self.trip_machine
                    .transition(trip_id, TripStatus::InProgress, TripStatus::Completed)
                    .await?;
                self.earnings_ledger.accrue(trip_id).await?;
                self.session_manager.finish_trip(driver_id, trip_id).await?;
                Ok(())
            }
            // Redelivered completion event: the accrual below is a no-op if
            // the fare is already recorded.
            TripStatus::Completed => {
                self.earnings_ledger.accrue(trip_id).await?;
                if let Err(err) = self.session_manager.finish_trip(driver_id, trip_id).await {
                    tracing::debug!("driver {} already released: {}", driver_id, err);
                }
                Ok(())
            }
            other => Err(DispatchError::stale(format!(
                "trip {} is {}, expected InProgress",
                trip_id, other
            ))),
        }
    }

    async fn verify_assigned(&self, driver_id: &str, trip_id: &str) -> DispatchResult<Trip> {
        let trip = self.trip_machine.get(trip_id).await?;
        if trip.assigned_driver.as_deref() != Some(driver_id) {
            return Err(DispatchError::stale(format!(
                "trip {} is not assigned to driver {}",
                trip_id, driver_id
            )));
        }
        Ok(trip)
    }

    // ---- read views ------------------------------------------------------

    pub async fn trip(&self, trip_id: &str) -> DispatchResult<Trip> {
        self.trip_machine.get(trip_id).await
    }

    pub async fn driver(&self, driver_id: &str) -> DispatchResult<Driver> {
        self.session_manager.get(driver_id).await
    }

    pub async fn earnings_summary(&self, driver_id: &str) -> DriverEarningsSummary {
        self.earnings_ledger.summary_for_driver(driver_id).await
    }

    pub async fn earnings_for_trip(&self, trip_id: &str) -> Option<EarningsEntry> {
        self.earnings_ledger.entry_for_trip(trip_id).await
    }

    pub async fn trip_history(&self, driver_id: &str) -> Vec<Trip> {
        self.trip_machine.trips_for_driver(driver_id).await
    }
}
