// src/services/dispatch_service.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::driver::AvailabilityState;
use crate::models::trip::{CancellationReason, OfferOutcome, Trip, TripStatus, TripSummary};
use crate::services::events::DispatchEvents;
use crate::services::session_service::{CandidateDriver, DriverSessionManager};
use crate::services::trip_service::TripStateMachine;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Accept,
    Decline,
}

/// How a live offer wait was resolved. The trip CAS is the arbiter; these
/// signals only wake the waiting dispatch loop early.
#[derive(Debug)]
enum OfferSignal {
    Accepted,
    Declined,
    Disconnected,
    Cancelled,
}

struct PendingOffer {
    driver_id: String,
    tx: oneshot::Sender<OfferSignal>,
}

enum OfferStep {
    Assigned(Trip),
    Stop(Trip),
    Advance,
}

/// Finds candidates for a `Requested` trip and runs the sequential offer
/// protocol: exactly one driver holds an offer at any moment, under a
/// cancellable timer. Sequential offering keeps the at-most-one-live-offer
/// invariant enforceable without any cross-driver locking.
pub struct DispatchMatcher {
    config: Arc<DispatchConfig>,
    sessions: Arc<DriverSessionManager>,
    trips: Arc<TripStateMachine>,
    events: Arc<dyn DispatchEvents>,
    pending: Mutex<HashMap<String, PendingOffer>>,
}

impl DispatchMatcher {
    pub fn new(
        config: Arc<DispatchConfig>,
        sessions: Arc<DriverSessionManager>,
        trips: Arc<TripStateMachine>,
        events: Arc<dyn DispatchEvents>,
    ) -> Self {
        Self {
            config,
            sessions,
            trips,
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Drive one trip through candidate search and sequential offers until a
    /// driver accepts, the requester cancels, or the pool is exhausted (which
    /// cancels the trip with `NoDriversAvailable`). Returns the final trip
    /// snapshot.
    pub async fn dispatch_trip(&self, trip_id: &str) -> DispatchResult<Trip> {
        let trip = self.trips.get(trip_id).await?;
        if trip.status != TripStatus::Requested {
            return Err(DispatchError::stale(format!(
                "trip {} is {}, expected Requested",
                trip_id, trip.status
            )));
        }

        let mut radius_m = self.config.search_radius_km * 1000.0;
        for round in 1..=self.config.max_expansion_rounds {
            let current = self.trips.get(trip_id).await?;
            if current.status != TripStatus::Requested {
                // Cancelled or assigned while between offers; nothing to do
                return Ok(current);
            }

            let already_offered: Vec<String> = current
                .offered_driver_ids()
                .iter()
                .map(|s| s.to_string())
                .collect();
            let candidates: Vec<CandidateDriver> = self
                .sessions
                .find_candidates(current.pickup, radius_m, Utc::now())
                .await
                .into_iter()
                .filter(|c| !already_offered.contains(&c.driver_id))
                .collect();

            tracing::debug!(
                "dispatch round {} for {}: {} candidate(s) within {:.0} m",
                round,
                trip_id,
                candidates.len(),
                radius_m
            );

            for candidate in candidates {
                match self.offer_to(trip_id, &candidate).await? {
                    OfferStep::Assigned(trip) => return Ok(trip),
                    OfferStep::Stop(trip) => return Ok(trip),
                    OfferStep::Advance => continue,
                }
            }

            radius_m *= self.config.radius_multiplier;
        }

        tracing::warn!("no drivers available for trip {}", trip_id);
        match self
            .trips
            .cancel(trip_id, CancellationReason::NoDriversAvailable)
            .await
        {
            Ok(trip) => Ok(trip),
            // Lost a race with an acceptance or a requester cancellation;
            // whatever state won is the answer.
            Err(err) if err.is_stale() => self.trips.get(trip_id).await,
            Err(err) => Err(err),
        }
    }

    /// One offer: bind driver and trip, notify, and wait out the cancellable
    /// timer. Every exit path funnels through the trip CAS, so a concurrent
    /// acceptance and a timeout cannot both win.
    async fn offer_to(&self, trip_id: &str, candidate: &CandidateDriver) -> DispatchResult<OfferStep> {
        let driver_id = &candidate.driver_id;

        // Grab the driver first; losing this race just means trying the next one.
        if self
            .sessions
            .cas_availability(driver_id, AvailabilityState::Idle, AvailabilityState::Offered)
            .await
            .is_err()
        {
            return Ok(OfferStep::Advance);
        }

        let trip = match self.trips.begin_offer(trip_id, driver_id).await {
            Ok(trip) => trip,
            Err(err) if err.is_stale() => {
                // Trip moved on (cancelled or already assigned) between rounds
                self.release_driver(driver_id).await;
                return Ok(OfferStep::Stop(self.trips.get(trip_id).await?));
            }
            Err(err) => {
                self.release_driver(driver_id).await;
                return Err(err);
            }
        };

        // The pending entry must exist before the driver hears about the
        // offer; an answer can arrive as soon as the notification lands.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            trip_id.to_string(),
            PendingOffer {
                driver_id: driver_id.clone(),
                tx,
            },
        );

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.config.offer_timeout())
                .unwrap_or_else(|_| chrono::Duration::seconds(15));
        self.events
            .on_offer_presented(driver_id, summarize(&trip, &self.config), expires_at)
            .await;

        let waited = tokio::time::timeout(self.config.offer_timeout(), rx).await;
        // Claim the pending slot back if nobody resolved it for us
        self.pending.lock().await.remove(trip_id);

        match waited {
            Ok(Ok(OfferSignal::Accepted)) => {
                tracing::info!("offer accepted: trip {} by {}", trip_id, driver_id);
                Ok(OfferStep::Assigned(self.trips.get(trip_id).await?))
            }
            Ok(Ok(OfferSignal::Declined)) => {
                self.close_offer(trip_id, driver_id, OfferOutcome::Declined)
                    .await
            }
            Ok(Ok(OfferSignal::Disconnected)) => {
                tracing::info!(
                    "candidate {} disconnected mid-offer for {}; advancing",
                    driver_id,
                    trip_id
                );
                self.close_offer(trip_id, driver_id, OfferOutcome::Disconnected)
                    .await
            }
            Ok(Ok(OfferSignal::Cancelled)) => {
                self.release_driver(driver_id).await;
                Ok(OfferStep::Stop(self.trips.get(trip_id).await?))
            }
            // Sender dropped or the timer ran out: same resolution path
            Ok(Err(_)) | Err(_) => {
                tracing::info!("offer to {} for {} timed out", driver_id, trip_id);
                self.close_offer(trip_id, driver_id, OfferOutcome::TimedOut)
                    .await
            }
        }
    }

    /// Resolve a non-accepted offer. A stale CAS here means an acceptance or
    /// cancellation won the race while we were deciding; re-read and follow it.
    async fn close_offer(
        &self,
        trip_id: &str,
        driver_id: &str,
        outcome: OfferOutcome,
    ) -> DispatchResult<OfferStep> {
        match self.trips.resolve_offer(trip_id, driver_id, outcome).await {
            Ok(_) => {
                self.release_driver(driver_id).await;
                Ok(OfferStep::Advance)
            }
            Err(err) if err.is_stale() => {
                let trip = self.trips.get(trip_id).await?;
                match trip.status {
                    TripStatus::Accepted if trip.assigned_driver.as_deref() == Some(driver_id) => {
                        Ok(OfferStep::Assigned(trip))
                    }
                    _ => {
                        self.release_driver(driver_id).await;
                        Ok(OfferStep::Stop(trip))
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn release_driver(&self, driver_id: &str) {
        // Best effort: the driver may have logged out or been removed meanwhile
        if let Err(err) = self
            .sessions
            .cas_availability(driver_id, AvailabilityState::Offered, AvailabilityState::Idle)
            .await
        {
            tracing::debug!("could not release driver {}: {}", driver_id, err);
        }
    }

    /// Driver's answer to the offer currently in front of them. Acceptance
    /// performs the `Offering -> Accepted` CAS right here, so the answer the
    /// driver gets back is definitive.
    pub async fn respond_to_offer(
        &self,
        driver_id: &str,
        trip_id: &str,
        decision: OfferDecision,
    ) -> DispatchResult<Trip> {
        let mut pending = self.pending.lock().await;
        let valid = pending
            .get(trip_id)
            .map(|p| p.driver_id == driver_id)
            .unwrap_or(false);
        if !valid {
            return Err(DispatchError::stale(format!(
                "no live offer for trip {} bound to driver {}",
                trip_id, driver_id
            )));
        }

        match decision {
            OfferDecision::Accept => {
                // Bind the driver before the trip: a driver no longer Offered
                // (gone offline, released) must fail here, never end up
                // holding an Accepted trip. The grab is rolled back if the
                // trip CAS then loses a race.
                self.sessions.begin_trip(driver_id, trip_id).await?;
                let trip = match self.trips.accept_offer(trip_id, driver_id).await {
                    Ok(trip) => trip,
                    Err(err) => {
                        if let Err(revert) = self.sessions.finish_trip(driver_id, trip_id).await {
                            tracing::warn!(
                                "could not release {} after failed accept of {}: {}",
                                driver_id,
                                trip_id,
                                revert
                            );
                        }
                        return Err(err);
                    }
                };
                if let Some(offer) = pending.remove(trip_id) {
                    let _ = offer.tx.send(OfferSignal::Accepted);
                }
                Ok(trip)
            }
            OfferDecision::Decline => {
                tracing::info!("offer declined: trip {} by {}", trip_id, driver_id);
                if let Some(offer) = pending.remove(trip_id) {
                    let _ = offer.tx.send(OfferSignal::Declined);
                }
                drop(pending);
                self.trips.get(trip_id).await
            }
        }
    }

    /// The bound candidate's connectivity dropped: implicit decline, advance
    /// immediately instead of waiting out the timer.
    pub async fn notify_disconnected(&self, driver_id: &str) {
        let mut pending = self.pending.lock().await;
        let trip_id = pending
            .iter()
            .find(|(_, p)| p.driver_id == driver_id)
            .map(|(trip_id, _)| trip_id.clone());
        if let Some(trip_id) = trip_id {
            if let Some(offer) = pending.remove(&trip_id) {
                let _ = offer.tx.send(OfferSignal::Disconnected);
            }
        }
    }

    /// Requester-side cancellation. The trip CAS happens first so that a late
    /// acceptance cannot slip in behind the cancel; the signal then wakes the
    /// dispatch loop to release the offered driver.
    pub async fn cancel_trip(&self, trip_id: &str, reason: CancellationReason) -> DispatchResult<Trip> {
        let trip = self.trips.cancel(trip_id, reason).await?;
        let mut pending = self.pending.lock().await;
        if let Some(offer) = pending.remove(trip_id) {
            let _ = offer.tx.send(OfferSignal::Cancelled);
        }
        Ok(trip)
    }
}

fn summarize(trip: &Trip, config: &DispatchConfig) -> TripSummary {
    let distance_km = trip.distance_m / 1000.0;
    let estimated_fare = config.pricing.base_fare
        + distance_km * config.pricing.per_km_rate
        + (trip.duration_estimate_secs / 60.0) * config.pricing.per_minute_rate;
    TripSummary {
        trip_id: trip.id.clone(),
        pickup: trip.pickup,
        dropoff: trip.dropoff,
        distance_km,
        estimated_fare,
    }
}
