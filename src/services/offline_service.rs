// src/services/offline_service.rs
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing;

use crate::config::DispatchConfig;
use crate::models::offline::{OfflineQueueItem, QueuedAction};
use crate::services::events::DispatchEvents;

/// Per-driver buffer of actions submitted while the session had no
/// connectivity. Items carry a per-driver monotonic sequence number and are
/// handed back strictly in that order on reconnect; items that outlived the
/// retention window are dropped and reported instead of replayed, since a
/// decision made that long ago is unsafe to apply.
///
/// Replayed items go through the exact same CAS paths as live calls (see
/// `AppState::apply_action`), so a stale one fails cleanly rather than
/// corrupting state.
pub struct OfflineReconciler {
    config: Arc<DispatchConfig>,
    events: Arc<dyn DispatchEvents>,
    queues: Mutex<HashMap<String, DriverQueue>>,
}

#[derive(Default)]
struct DriverQueue {
    items: Vec<OfflineQueueItem>,
    next_seq: u64,
}

impl OfflineReconciler {
    pub fn new(config: Arc<DispatchConfig>, events: Arc<dyn DispatchEvents>) -> Self {
        Self {
            config,
            events,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Buffer an action, assigning the next sequence number for this driver.
    pub async fn enqueue(&self, driver_id: &str, action: QueuedAction) -> OfflineQueueItem {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(driver_id.to_string()).or_default();
        queue.next_seq += 1;
        let item = OfflineQueueItem {
            seq: queue.next_seq,
            queued_at: Utc::now(),
            action,
        };
        tracing::debug!(
            "queued offline action for {}: seq {} ({})",
            driver_id,
            item.seq,
            item.action.kind()
        );
        queue.items.push(item.clone());
        item
    }

    /// Buffer an action that already carries its sequence tag (clients number
    /// their actions at submission time; arrival order is meaningless).
    pub async fn enqueue_tagged(
        &self,
        driver_id: &str,
        seq: u64,
        action: QueuedAction,
    ) -> OfflineQueueItem {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(driver_id.to_string()).or_default();
        // Retransmitted tag: keep the copy already queued
        if let Some(existing) = queue.items.iter().find(|i| i.seq == seq) {
            tracing::debug!(
                "duplicate offline tag for {}: seq {} already queued",
                driver_id,
                seq
            );
            return existing.clone();
        }
        queue.next_seq = queue.next_seq.max(seq);
        let item = OfflineQueueItem {
            seq,
            queued_at: Utc::now(),
            action,
        };
        queue.items.push(item.clone());
        item
    }

    pub async fn pending_count(&self, driver_id: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(driver_id).map(|q| q.items.len()).unwrap_or(0)
    }

    /// Take everything queued for this driver, in replay order. Expired items
    /// are split out of the result and reported via `on_action_dropped`.
    pub async fn drain(&self, driver_id: &str) -> (Vec<OfflineQueueItem>, Vec<OfflineQueueItem>) {
        let mut items = {
            let mut queues = self.queues.lock().await;
            match queues.get_mut(driver_id) {
                Some(queue) => std::mem::take(&mut queue.items),
                None => return (Vec::new(), Vec::new()),
            }
        };
        items.sort_by_key(|item| item.seq);

        let now = Utc::now();
        let retention = self.config.offline_retention();
        let mut ready = Vec::with_capacity(items.len());
        let mut expired = Vec::new();
        for item in items {
            if now.signed_duration_since(item.queued_at) > retention {
                tracing::warn!(
                    "offline action expired for {}: seq {} ({})",
                    driver_id,
                    item.seq,
                    item.action.kind()
                );
                self.events.on_action_dropped(driver_id, item.clone()).await;
                expired.push(item);
            } else {
                ready.push(item);
            }
        }
        (ready, expired)
    }

    pub async fn clear(&self, driver_id: &str) {
        self.queues.lock().await.remove(driver_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::AvailabilityState;
    use crate::services::events::LoggingEvents;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex as StdMutex;

    fn reconciler() -> OfflineReconciler {
        OfflineReconciler::new(Arc::new(DispatchConfig::default()), Arc::new(LoggingEvents))
    }

    fn availability() -> QueuedAction {
        QueuedAction::Availability(AvailabilityState::Idle)
    }

    #[tokio::test]
    async fn test_auto_sequencing() {
        let reconciler = reconciler();
        let a = reconciler.enqueue("drv-1", availability()).await;
        let b = reconciler.enqueue("drv-1", availability()).await;
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        // Sequences are per driver
        let other = reconciler.enqueue("drv-2", availability()).await;
        assert_eq!(other.seq, 1);
    }

    #[tokio::test]
    async fn test_drain_orders_by_seq_not_arrival() {
        let reconciler = reconciler();
        // Out of order on the wire, tagged 3, 1, 2
        reconciler.enqueue_tagged("drv-1", 3, availability()).await;
        reconciler.enqueue_tagged("drv-1", 1, availability()).await;
        reconciler.enqueue_tagged("drv-1", 2, availability()).await;

        let (items, expired) = reconciler.drain("drv-1").await;
        let seqs: Vec<u64> = items.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(expired.is_empty());

        // Drained means gone
        assert_eq!(reconciler.pending_count("drv-1").await, 0);
    }

    #[tokio::test]
    async fn test_retransmitted_tag_queued_once() {
        let reconciler = reconciler();
        let first = reconciler.enqueue_tagged("drv-1", 1, availability()).await;
        let again = reconciler.enqueue_tagged("drv-1", 1, availability()).await;
        assert_eq!(again.queued_at, first.queued_at);
        assert_eq!(reconciler.pending_count("drv-1").await, 1);

        let (items, expired) = reconciler.drain("drv-1").await;
        assert_eq!(items.len(), 1);
        assert!(expired.is_empty());
    }

    struct DropRecorder {
        dropped: StdMutex<Vec<u64>>,
    }

    #[async_trait]
    impl DispatchEvents for DropRecorder {
        async fn on_offer_presented(
            &self,
            _: &str,
            _: crate::models::trip::TripSummary,
            _: DateTime<Utc>,
        ) {
        }
        async fn on_trip_state_changed(&self, _: &str, _: crate::models::trip::TripStatus) {}
        async fn on_earnings_recorded(&self, _: &str, _: crate::models::earnings::EarningsEntry) {}
        async fn on_action_dropped(&self, _: &str, item: OfflineQueueItem) {
            self.dropped.lock().unwrap().push(item.seq);
        }
    }

    #[tokio::test]
    async fn test_expired_items_dropped_and_reported() {
        let recorder = Arc::new(DropRecorder {
            dropped: StdMutex::new(Vec::new()),
        });
        let reconciler = OfflineReconciler::new(
            Arc::new(DispatchConfig::default()),
            recorder.clone(),
        );

        reconciler.enqueue("drv-1", availability()).await;
        reconciler.enqueue("drv-1", availability()).await;
        // Age the first item past the retention window
        {
            let mut queues = reconciler.queues.lock().await;
            let queue = queues.get_mut("drv-1").unwrap();
            queue.items[0].queued_at = Utc::now() - chrono::Duration::seconds(601);
        }

        let (items, expired) = reconciler.drain("drv-1").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].seq, 2);
        assert_eq!(expired.len(), 1);
        assert_eq!(*recorder.dropped.lock().unwrap(), vec![1]);
    }
}
