// src/services/events.rs
//
// Outbound boundary to the excluded presentation/notification collaborators.
// The engine never knows how an offer reaches a phone; it just calls this
// trait. Hosts plug in their own delivery, tests plug in recorders.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing;

use crate::models::earnings::EarningsEntry;
use crate::models::offline::OfflineQueueItem;
use crate::models::trip::{TripStatus, TripSummary};

#[async_trait]
pub trait DispatchEvents: Send + Sync {
    /// A time-bounded offer is now in front of the given driver.
    async fn on_offer_presented(
        &self,
        driver_id: &str,
        summary: TripSummary,
        expires_at: DateTime<Utc>,
    );

    async fn on_trip_state_changed(&self, trip_id: &str, new_state: TripStatus);

    async fn on_earnings_recorded(&self, driver_id: &str, entry: EarningsEntry);

    /// A queued offline action outlived the retention window and was dropped.
    async fn on_action_dropped(&self, driver_id: &str, item: OfflineQueueItem);
}

/// Default sink that just logs; useful for development and as a stand-in when
/// the host has no notification transport wired up.
#[derive(Debug, Default)]
pub struct LoggingEvents;

#[async_trait]
impl DispatchEvents for LoggingEvents {
    async fn on_offer_presented(
        &self,
        driver_id: &str,
        summary: TripSummary,
        expires_at: DateTime<Utc>,
    ) {
        tracing::info!(
            "offer presented to {}: trip {} ({:.1} km, ~{:.2} fare), expires {}",
            driver_id,
            summary.trip_id,
            summary.distance_km,
            summary.estimated_fare,
            expires_at
        );
    }

    async fn on_trip_state_changed(&self, trip_id: &str, new_state: TripStatus) {
        tracing::info!("trip {} -> {}", trip_id, new_state);
    }

    async fn on_earnings_recorded(&self, driver_id: &str, entry: EarningsEntry) {
        tracing::info!(
            "earnings recorded for {}: {:.2} {} (trip {})",
            driver_id,
            entry.fare.total,
            entry.fare.currency,
            entry.trip_id
        );
    }

    async fn on_action_dropped(&self, driver_id: &str, item: OfflineQueueItem) {
        tracing::warn!(
            "dropped expired offline action for {}: seq {} ({})",
            driver_id,
            item.seq,
            item.action.kind()
        );
    }
}
