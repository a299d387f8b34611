// src/services/location_service.rs
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::driver::LocationSample;

/// Per-driver ingestion of GPS fixes: monotonic sequence enforcement, jitter
/// filtering, and a bounded ring buffer of recent samples.
///
/// Samples are immutable; a newer one supersedes rather than mutates. The
/// buffer never exceeds the configured capacity (oldest evicted first).
pub struct LocationTracker {
    config: Arc<DispatchConfig>,
    tracks: RwLock<HashMap<String, DriverTrack>>,
}

struct DriverTrack {
    samples: VecDeque<LocationSample>,
    last_seq: u64,
}

impl DriverTrack {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            last_seq: 0,
        }
    }
}

impl LocationTracker {
    pub fn new(config: Arc<DispatchConfig>) -> Self {
        Self {
            config,
            tracks: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one sample. Rejects reordered duplicates (`seq` at or below the
    /// last accepted one) and fixes whose reported accuracy is worse than the
    /// configured bound.
    pub async fn record(&self, driver_id: &str, sample: LocationSample) -> DispatchResult<LocationSample> {
        if sample.accuracy_m > self.config.max_sample_accuracy_m {
            tracing::debug!(
                "discarding jittery sample for {}: accuracy {:.0} m",
                driver_id,
                sample.accuracy_m
            );
            return Err(DispatchError::stale_sample(format!(
                "accuracy {:.0} m exceeds {:.0} m bound",
                sample.accuracy_m, self.config.max_sample_accuracy_m
            )));
        }

        let mut tracks = self.tracks.write().await;
        let track = tracks
            .entry(driver_id.to_string())
            .or_insert_with(DriverTrack::new);

        if sample.seq <= track.last_seq {
            tracing::debug!(
                "discarding out-of-order sample for {}: seq {} <= {}",
                driver_id,
                sample.seq,
                track.last_seq
            );
            return Err(DispatchError::stale_sample(format!(
                "seq {} not above last applied {}",
                sample.seq, track.last_seq
            )));
        }

        track.last_seq = sample.seq;
        track.samples.push_back(sample);
        while track.samples.len() > self.config.location_buffer_size {
            track.samples.pop_front();
        }

        Ok(sample)
    }

    pub async fn latest(&self, driver_id: &str) -> Option<LocationSample> {
        let tracks = self.tracks.read().await;
        tracks
            .get(driver_id)
            .and_then(|t| t.samples.back().copied())
    }

    /// Whether the driver's newest sample is recent enough for dispatch
    /// candidacy.
    pub async fn is_fresh(&self, driver_id: &str, now: DateTime<Utc>) -> bool {
        match self.latest(driver_id).await {
            Some(sample) => now.signed_duration_since(sample.timestamp) <= self.config.location_staleness(),
            None => false,
        }
    }

    pub async fn samples(&self, driver_id: &str) -> Vec<LocationSample> {
        let tracks = self.tracks.read().await;
        tracks
            .get(driver_id)
            .map(|t| t.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn remove(&self, driver_id: &str) {
        self.tracks.write().await.remove(driver_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::GeoPoint;

    fn sample(seq: u64, accuracy_m: f64) -> LocationSample {
        LocationSample {
            point: GeoPoint::new(5.6037, -0.1870),
            accuracy_m,
            timestamp: Utc::now(),
            seq,
        }
    }

    fn tracker() -> LocationTracker {
        LocationTracker::new(Arc::new(DispatchConfig::default()))
    }

    #[tokio::test]
    async fn test_monotonic_sequence() {
        let tracker = tracker();
        tracker.record("drv-1", sample(1, 10.0)).await.unwrap();
        tracker.record("drv-1", sample(3, 10.0)).await.unwrap();

        // Reordered duplicate and equal seq are both rejected
        let err = tracker.record("drv-1", sample(2, 10.0)).await.unwrap_err();
        assert!(matches!(err, DispatchError::StaleSample(_)));
        let err = tracker.record("drv-1", sample(3, 10.0)).await.unwrap_err();
        assert!(matches!(err, DispatchError::StaleSample(_)));

        assert_eq!(tracker.latest("drv-1").await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn test_jitter_filter() {
        let tracker = tracker();
        let err = tracker.record("drv-1", sample(1, 500.0)).await.unwrap_err();
        assert!(matches!(err, DispatchError::StaleSample(_)));
        assert!(tracker.latest("drv-1").await.is_none());
    }

    #[tokio::test]
    async fn test_ring_buffer_bound() {
        let config = Arc::new(DispatchConfig {
            location_buffer_size: 4,
            ..DispatchConfig::default()
        });
        let tracker = LocationTracker::new(config);
        for seq in 1..=10 {
            tracker.record("drv-1", sample(seq, 10.0)).await.unwrap();
        }

        let samples = tracker.samples("drv-1").await;
        assert_eq!(samples.len(), 4);
        // Oldest evicted first
        assert_eq!(samples.first().unwrap().seq, 7);
        assert_eq!(samples.last().unwrap().seq, 10);
    }

    #[tokio::test]
    async fn test_freshness() {
        let tracker = tracker();
        assert!(!tracker.is_fresh("drv-1", Utc::now()).await);

        tracker.record("drv-1", sample(1, 10.0)).await.unwrap();
        assert!(tracker.is_fresh("drv-1", Utc::now()).await);

        // A sample older than the staleness threshold no longer counts
        let later = Utc::now() + chrono::Duration::seconds(46);
        assert!(!tracker.is_fresh("drv-1", later).await);
    }
}
