// src/models/offline.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;
use crate::models::driver::{AvailabilityState, LocationSample};

/// An action a disconnected driver submitted for later replay.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum QueuedAction {
    LocationPing(LocationSample),
    OfferResponse { trip_id: String, accept: bool },
    CompleteTrip { trip_id: String },
    Availability(AvailabilityState),
}

impl QueuedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            QueuedAction::LocationPing(_) => "location_ping",
            QueuedAction::OfferResponse { .. } => "offer_response",
            QueuedAction::CompleteTrip { .. } => "complete_trip",
            QueuedAction::Availability(_) => "availability",
        }
    }
}

/// A deferred action with its per-driver replay position. Replay order is
/// ascending `seq`, regardless of arrival order on the wire.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OfflineQueueItem {
    pub seq: u64,
    pub queued_at: DateTime<Utc>,
    pub action: QueuedAction,
}

/// Outcome of replaying one driver's offline queue.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Sequence numbers applied successfully.
    pub applied: Vec<u64>,
    /// Sequence numbers dropped because the item outlived the retention window.
    pub expired: Vec<u64>,
    /// Items whose replay was rejected by a CAS (state moved on while offline).
    pub conflicts: Vec<(u64, DispatchError)>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.expired.is_empty() && self.conflicts.is_empty()
    }
}
