// src/errors.rs
use thiserror::Error;

/// Main error type for the dispatch engine.
///
/// Everything here is recoverable: callers re-read and retry, or abandon the
/// action and refresh their view. Only `InternalInconsistency` indicates a
/// broken invariant, and it is logged as critical before being returned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    // CAS and state-machine errors
    #[error("stale state conflict: {0}")]
    StaleStateConflict(String),
    #[error("invalid trip transition: {from} -> {to}")]
    InvalidTripTransition { from: String, to: String },
    #[error("invalid availability transition: {from} -> {to}")]
    InvalidAvailabilityTransition { from: String, to: String },

    // Location ingestion errors
    #[error("stale location sample: {0}")]
    StaleSample(String),

    // Dispatch errors
    #[error("no drivers available for trip {0}")]
    NoDriversAvailable(String),

    // Offline replay errors
    #[error("queued action expired: {0}")]
    ActionExpired(String),

    // Lookup errors
    #[error("driver not found: {0}")]
    DriverNotFound(String),
    #[error("trip not found: {0}")]
    TripNotFound(String),
    #[error("driver already registered: {0}")]
    DriverAlreadyRegistered(String),

    // Structurally unreachable under the CAS discipline; surfaced to the
    // operator rather than panicking.
    #[error("internal consistency fault: {0}")]
    InternalInconsistency(String),
}

// Convenience type alias for Results
pub type DispatchResult<T> = Result<T, DispatchError>;

// Helper functions for creating common errors
impl DispatchError {
    pub fn stale(msg: impl Into<String>) -> Self {
        DispatchError::StaleStateConflict(msg.into())
    }

    pub fn stale_sample(msg: impl Into<String>) -> Self {
        DispatchError::StaleSample(msg.into())
    }

    pub fn driver_not_found(driver_id: impl Into<String>) -> Self {
        DispatchError::DriverNotFound(driver_id.into())
    }

    pub fn trip_not_found(trip_id: impl Into<String>) -> Self {
        DispatchError::TripNotFound(trip_id.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("internal consistency fault: {}", msg);
        DispatchError::InternalInconsistency(msg)
    }

    /// Whether the caller should re-read current state and retry or refresh.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            DispatchError::StaleStateConflict(_) | DispatchError::StaleSample(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DispatchError::DriverNotFound("drv-123".to_string());
        assert_eq!(error.to_string(), "driver not found: drv-123");

        let error = DispatchError::InvalidAvailabilityTransition {
            from: "OnTrip".to_string(),
            to: "Idle".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid availability transition: OnTrip -> Idle"
        );
    }

    #[test]
    fn test_helper_functions() {
        assert!(matches!(
            DispatchError::stale("test"),
            DispatchError::StaleStateConflict(_)
        ));
        assert!(matches!(
            DispatchError::trip_not_found("trp-1"),
            DispatchError::TripNotFound(_)
        ));
    }

    #[test]
    fn test_is_stale() {
        assert!(DispatchError::stale("x").is_stale());
        assert!(DispatchError::stale_sample("x").is_stale());
        assert!(!DispatchError::NoDriversAvailable("trp-1".to_string()).is_stale());
    }
}
