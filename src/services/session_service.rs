// src/services/session_service.rs
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::driver::{AvailabilityState, Driver, LocationSample};
use crate::services::location_service::LocationTracker;
use crate::utils::geo;
use crate::utils::id_generator::{IdGenerator, IdType};

/// A ranked dispatch candidate: an `Idle`, connected driver with a fresh
/// location inside the search radius.
#[derive(Debug, Clone)]
pub struct CandidateDriver {
    pub driver_id: String,
    pub distance_m: f64,
    pub eta_secs: f64,
}

/// Owns every `Driver` record. All mutation goes through the availability CAS;
/// nothing outside this service touches a driver's state directly.
pub struct DriverSessionManager {
    config: Arc<DispatchConfig>,
    location: Arc<LocationTracker>,
    drivers: RwLock<HashMap<String, Driver>>,
}

impl DriverSessionManager {
    pub fn new(config: Arc<DispatchConfig>, location: Arc<LocationTracker>) -> Self {
        Self {
            config,
            location,
            drivers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self) -> Driver {
        let id = IdGenerator::generate(IdType::Driver);
        let driver = Driver::new(id.clone());
        self.drivers.write().await.insert(id.clone(), driver.clone());
        tracing::info!("driver registered: {}", id);
        driver
    }

    /// Register under a caller-chosen id (host systems carry their own ids).
    pub async fn register_with_id(&self, driver_id: &str) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write().await;
        if drivers.contains_key(driver_id) {
            return Err(DispatchError::DriverAlreadyRegistered(driver_id.to_string()));
        }
        let driver = Driver::new(driver_id.to_string());
        drivers.insert(driver_id.to_string(), driver.clone());
        tracing::info!("driver registered: {}", driver_id);
        Ok(driver)
    }

    /// Destroy the session on logout/expiry, dropping the location track too.
    pub async fn remove(&self, driver_id: &str) -> DispatchResult<()> {
        let removed = self.drivers.write().await.remove(driver_id);
        if removed.is_none() {
            return Err(DispatchError::driver_not_found(driver_id));
        }
        self.location.remove(driver_id).await;
        tracing::info!("driver removed: {}", driver_id);
        Ok(())
    }

    pub async fn get(&self, driver_id: &str) -> DispatchResult<Driver> {
        let drivers = self.drivers.read().await;
        drivers
            .get(driver_id)
            .cloned()
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))
    }

    /// Validate and apply one location sample, updating last-seen. Out-of-order
    /// or jittery samples are rejected by the tracker and leave the record
    /// untouched.
    pub async fn update_location(
        &self,
        driver_id: &str,
        sample: LocationSample,
    ) -> DispatchResult<Driver> {
        // Existence check up front so unknown drivers don't grow tracks
        self.get(driver_id).await?;

        let accepted = self.location.record(driver_id, sample).await?;

        let mut drivers = self.drivers.write().await;
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
        driver.current_location = Some(accepted);
        driver.last_seen = Some(accepted.timestamp);
        Ok(driver.clone())
    }

    /// Compare-and-swap on availability. Fails with `StaleStateConflict` when
    /// the caller's expectation is outdated and with
    /// `InvalidAvailabilityTransition` for edges outside the state machine.
    pub async fn cas_availability(
        &self,
        driver_id: &str,
        expected: AvailabilityState,
        target: AvailabilityState,
    ) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write().await;
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;

        if driver.availability != expected {
            return Err(DispatchError::stale(format!(
                "driver {} is {}, expected {}",
                driver_id, driver.availability, expected
            )));
        }
        if !expected.can_transition_to(target) {
            tracing::warn!(
                "rejected availability transition for {}: {} -> {}",
                driver_id,
                expected,
                target
            );
            return Err(DispatchError::InvalidAvailabilityTransition {
                from: expected.to_string(),
                to: target.to_string(),
            });
        }
        // Leaving a trip goes through finish_trip, which clears the reference
        // first; a bare OnTrip -> Idle with a live trip is not a legal request.
        if expected == AvailabilityState::OnTrip && driver.active_trip_id.is_some() {
            return Err(DispatchError::InvalidAvailabilityTransition {
                from: expected.to_string(),
                to: target.to_string(),
            });
        }

        driver.availability = target;
        tracing::info!("driver {} availability: {} -> {}", driver_id, expected, target);
        Ok(driver.clone())
    }

    /// Availability change against whatever the current state is (driver-app
    /// toggles). Still validates the edge.
    pub async fn set_availability(
        &self,
        driver_id: &str,
        target: AvailabilityState,
    ) -> DispatchResult<Driver> {
        let current = self.get(driver_id).await?.availability;
        self.cas_availability(driver_id, current, target).await
    }

    /// Bind the driver to an accepted trip: `Offered -> OnTrip` plus the
    /// active-trip reference, atomically under the registry lock.
    pub async fn begin_trip(&self, driver_id: &str, trip_id: &str) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write().await;
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;

        if driver.availability != AvailabilityState::Offered {
            return Err(DispatchError::stale(format!(
                "driver {} is {}, expected Offered",
                driver_id, driver.availability
            )));
        }
        driver.availability = AvailabilityState::OnTrip;
        driver.active_trip_id = Some(trip_id.to_string());
        tracing::info!("driver {} bound to trip {}", driver_id, trip_id);
        Ok(driver.clone())
    }

    /// Release the driver after completion or cancellation of their trip.
    pub async fn finish_trip(&self, driver_id: &str, trip_id: &str) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write().await;
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;

        if driver.active_trip_id.as_deref() != Some(trip_id) {
            return Err(DispatchError::stale(format!(
                "driver {} not bound to trip {}",
                driver_id, trip_id
            )));
        }
        driver.active_trip_id = None;
        driver.availability = AvailabilityState::Idle;
        tracing::info!("driver {} released from trip {}", driver_id, trip_id);
        Ok(driver.clone())
    }

    pub async fn set_connected(&self, driver_id: &str, connected: bool) -> DispatchResult<Driver> {
        let mut drivers = self.drivers.write().await;
        let driver = drivers
            .get_mut(driver_id)
            .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
        driver.connected = connected;
        tracing::info!(
            "driver {} {}",
            driver_id,
            if connected { "connected" } else { "disconnected" }
        );
        Ok(driver.clone())
    }

    pub async fn is_connected(&self, driver_id: &str) -> bool {
        let drivers = self.drivers.read().await;
        drivers.get(driver_id).map(|d| d.connected).unwrap_or(false)
    }

    /// Ranked candidate pool for a pickup point: `Idle`, connected drivers
    /// with a fresh fix inside the radius, ordered by ascending ETA with the
    /// driver id as a deterministic tie-break.
    pub async fn find_candidates(
        &self,
        pickup: crate::models::driver::GeoPoint,
        radius_m: f64,
        now: DateTime<Utc>,
    ) -> Vec<CandidateDriver> {
        let staleness = self.config.location_staleness();
        let speed = self.config.assumed_speed_mps();

        let drivers = self.drivers.read().await;
        let mut candidates: Vec<CandidateDriver> = drivers
            .values()
            .filter(|d| d.availability == AvailabilityState::Idle && d.connected)
            .filter_map(|d| {
                let sample = d.current_location?;
                // Silent connectivity loss: a stale fix drops the driver from
                // candidacy until a fresh one arrives.
                if now.signed_duration_since(sample.timestamp) > staleness {
                    return None;
                }
                let distance_m = geo::distance_meters(pickup, sample.point);
                if distance_m > radius_m {
                    return None;
                }
                Some(CandidateDriver {
                    driver_id: d.id.clone(),
                    distance_m,
                    eta_secs: geo::eta_seconds(distance_m, speed),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.eta_secs
                .partial_cmp(&b.eta_secs)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::GeoPoint;

    fn manager() -> DriverSessionManager {
        let config = Arc::new(DispatchConfig::default());
        let location = Arc::new(LocationTracker::new(config.clone()));
        DriverSessionManager::new(config, location)
    }

    fn sample(seq: u64, lat: f64, lon: f64) -> LocationSample {
        LocationSample {
            point: GeoPoint::new(lat, lon),
            accuracy_m: 10.0,
            timestamp: Utc::now(),
            seq,
        }
    }

    async fn idle_driver_at(manager: &DriverSessionManager, id: &str, lat: f64, lon: f64) {
        manager.register_with_id(id).await.unwrap();
        manager
            .set_availability(id, AvailabilityState::Idle)
            .await
            .unwrap();
        manager.update_location(id, sample(1, lat, lon)).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let manager = manager();
        let driver = manager.register().await;
        assert!(manager.get(&driver.id).await.is_ok());
        manager.remove(&driver.id).await.unwrap();
        assert!(matches!(
            manager.get(&driver.id).await,
            Err(DispatchError::DriverNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = manager();
        manager.register_with_id("drv-1").await.unwrap();
        assert!(matches!(
            manager.register_with_id("drv-1").await,
            Err(DispatchError::DriverAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_availability_conflict() {
        let manager = manager();
        manager.register_with_id("drv-1").await.unwrap();
        manager
            .set_availability("drv-1", AvailabilityState::Idle)
            .await
            .unwrap();

        // Stale expectation fails without being applied
        let err = manager
            .cas_availability("drv-1", AvailabilityState::Offline, AvailabilityState::Idle)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleStateConflict(_)));
        assert_eq!(
            manager.get("drv-1").await.unwrap().availability,
            AvailabilityState::Idle
        );
    }

    #[tokio::test]
    async fn test_on_trip_cannot_go_idle_with_active_trip() {
        let manager = manager();
        manager.register_with_id("drv-1").await.unwrap();
        manager
            .set_availability("drv-1", AvailabilityState::Idle)
            .await
            .unwrap();
        manager
            .cas_availability("drv-1", AvailabilityState::Idle, AvailabilityState::Offered)
            .await
            .unwrap();
        manager.begin_trip("drv-1", "trp-1").await.unwrap();

        let err = manager
            .set_availability("drv-1", AvailabilityState::Idle)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidAvailabilityTransition { .. }
        ));

        // The completion path clears the trip and releases the driver
        let driver = manager.finish_trip("drv-1", "trp-1").await.unwrap();
        assert_eq!(driver.availability, AvailabilityState::Idle);
        assert!(driver.active_trip_id.is_none());
    }

    #[tokio::test]
    async fn test_candidates_ranked_by_distance() {
        let manager = manager();
        let pickup = GeoPoint::new(5.6000, -0.1870);
        // ~1 km, ~2 km, ~4 km north of the pickup point
        idle_driver_at(&manager, "drv-b", 5.6090, -0.1870).await;
        idle_driver_at(&manager, "drv-a", 5.6180, -0.1870).await;
        idle_driver_at(&manager, "drv-c", 5.6360, -0.1870).await;

        let candidates = manager.find_candidates(pickup, 5_000.0, Utc::now()).await;
        let ids: Vec<&str> = candidates.iter().map(|c| c.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["drv-b", "drv-a", "drv-c"]);
    }

    #[tokio::test]
    async fn test_candidates_exclude_stale_and_disconnected() {
        let manager = manager();
        let pickup = GeoPoint::new(5.6000, -0.1870);
        idle_driver_at(&manager, "drv-fresh", 5.6050, -0.1870).await;
        idle_driver_at(&manager, "drv-gone", 5.6050, -0.1870).await;
        manager.set_connected("drv-gone", false).await.unwrap();

        // Fresh fix required: query far enough in the future and everyone is out
        let later = Utc::now() + chrono::Duration::seconds(60);
        assert!(manager.find_candidates(pickup, 5_000.0, later).await.is_empty());

        let candidates = manager.find_candidates(pickup, 5_000.0, Utc::now()).await;
        let ids: Vec<&str> = candidates.iter().map(|c| c.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["drv-fresh"]);
    }

    #[tokio::test]
    async fn test_stale_sample_leaves_record_untouched() {
        let manager = manager();
        manager.register_with_id("drv-1").await.unwrap();
        manager
            .set_availability("drv-1", AvailabilityState::Idle)
            .await
            .unwrap();
        manager
            .update_location("drv-1", sample(5, 5.6, -0.18))
            .await
            .unwrap();

        let err = manager
            .update_location("drv-1", sample(4, 5.7, -0.18))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StaleSample(_)));

        let driver = manager.get("drv-1").await.unwrap();
        assert_eq!(driver.current_location.unwrap().seq, 5);
    }
}
