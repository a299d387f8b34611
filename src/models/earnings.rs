// src/models/earnings.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Computed fare breakdown for a completed trip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Fare {
    pub base_fare: f64,
    pub distance_fare: f64,
    pub time_fare: f64,
    pub total: f64,
    pub currency: String,
}

/// One fare accrual. At most one per trip id, even under retried completion
/// events (the trip id is the idempotency key).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EarningsEntry {
    pub id: String,
    pub trip_id: String,
    pub driver_id: String,
    pub fare: Fare,
    pub accrued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverEarningsSummary {
    pub driver_id: String,
    pub entries: Vec<EarningsEntry>,
    pub total: f64,
    pub currency: String,
}
