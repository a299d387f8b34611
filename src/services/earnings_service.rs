// src/services/earnings_service.rs
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::earnings::{DriverEarningsSummary, EarningsEntry, Fare};
use crate::models::trip::{Trip, TripStatus};
use crate::services::events::DispatchEvents;
use crate::services::trip_service::TripStateMachine;

/// Fare accrual keyed by trip id. The trip id is the idempotency key: however
/// many times a completion event is delivered, at most one entry exists, and
/// every repeat call returns that same entry.
pub struct EarningsLedger {
    config: Arc<DispatchConfig>,
    trips: Arc<TripStateMachine>,
    events: Arc<dyn DispatchEvents>,
    entries: RwLock<HashMap<String, EarningsEntry>>,
}

impl EarningsLedger {
    pub fn new(
        config: Arc<DispatchConfig>,
        trips: Arc<TripStateMachine>,
        events: Arc<dyn DispatchEvents>,
    ) -> Self {
        Self {
            config,
            trips,
            events,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record the fare for a completed trip. Tolerates at-least-once delivery
    /// of completion events: a repeated call is an idempotent no-op returning
    /// the original entry.
    pub async fn accrue(&self, trip_id: &str) -> DispatchResult<EarningsEntry> {
        let trip = self.trips.get(trip_id).await?;
        if trip.status != TripStatus::Completed {
            return Err(DispatchError::stale(format!(
                "trip {} is {}, expected Completed",
                trip_id, trip.status
            )));
        }
        let driver_id = trip.assigned_driver.clone().ok_or_else(|| {
            // A Completed trip always carries its accepted driver
            DispatchError::internal(format!("completed trip {} has no assigned driver", trip_id))
        })?;

        let entry = {
            let mut entries = self.entries.write().await;
            if let Some(existing) = entries.get(trip_id) {
                tracing::debug!("idempotent accrue for trip {}: entry exists", trip_id);
                return Ok(existing.clone());
            }

            let entry = EarningsEntry {
                id: format!("ern-{}", Uuid::new_v4()),
                trip_id: trip_id.to_string(),
                driver_id: driver_id.clone(),
                fare: self.compute_fare(&trip),
                accrued_at: Utc::now(),
            };
            entries.insert(trip_id.to_string(), entry.clone());
            entry
        };

        tracing::info!(
            "fare accrued for trip {}: {:.2} {} to {}",
            trip_id,
            entry.fare.total,
            entry.fare.currency,
            driver_id
        );
        self.events.on_earnings_recorded(&driver_id, entry.clone()).await;
        Ok(entry)
    }

    pub async fn entry_for_trip(&self, trip_id: &str) -> Option<EarningsEntry> {
        self.entries.read().await.get(trip_id).cloned()
    }

    /// Per-driver earnings view, newest first, with a running total.
    pub async fn summary_for_driver(&self, driver_id: &str) -> DriverEarningsSummary {
        let entries = self.entries.read().await;
        let mut driver_entries: Vec<EarningsEntry> = entries
            .values()
            .filter(|e| e.driver_id == driver_id)
            .cloned()
            .collect();
        driver_entries.sort_by(|a, b| b.accrued_at.cmp(&a.accrued_at));
        let total = driver_entries.iter().map(|e| e.fare.total).sum();
        DriverEarningsSummary {
            driver_id: driver_id.to_string(),
            entries: driver_entries,
            total,
            currency: self.config.pricing.currency.clone(),
        }
    }

    fn compute_fare(&self, trip: &Trip) -> Fare {
        let pricing = &self.config.pricing;
        let distance_km = trip.distance_m / 1000.0;
        let duration_min = trip.duration_estimate_secs / 60.0;

        let base_fare = pricing.base_fare;
        let distance_fare = distance_km * pricing.per_km_rate;
        let time_fare = duration_min * pricing.per_minute_rate;
        Fare {
            base_fare,
            distance_fare,
            time_fare,
            total: base_fare + distance_fare + time_fare,
            currency: pricing.currency.clone(),
        }
    }
}
