use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use swiftcab_dispatch::models::driver::GeoPoint;
use swiftcab_dispatch::{AppState, DispatchConfig, LoggingEvents, OfferDecision};

/// Scripted end-to-end run: three idle drivers around a pickup point, the
/// nearest declines, the next one accepts and drives the trip to completion.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let state = AppState::new(DispatchConfig::default(), Arc::new(LoggingEvents));

    // Three drivers roughly 1 km, 2 km and 4 km from the pickup
    let pickup = GeoPoint::new(5.6000, -0.1870);
    let dropoff = GeoPoint::new(5.5560, -0.1969);
    let positions = [
        ("drv-near", 5.6090, -0.1870),
        ("drv-mid", 5.6180, -0.1870),
        ("drv-far", 5.6360, -0.1870),
    ];
    for (id, lat, lon) in positions {
        state.register_driver_with_id(id).await.unwrap();
        state.go_online(id).await.unwrap();
        state
            .report_location(id, lat, lon, Utc::now(), 10.0, 1)
            .await
            .unwrap();
    }

    let trip_id = state.submit_trip_request(pickup, dropoff).await;
    tracing::info!("trip requested: {}", trip_id);

    // Nearest driver turns the offer down
    tokio::time::sleep(Duration::from_millis(100)).await;
    state
        .respond_to_offer("drv-near", &trip_id, OfferDecision::Decline)
        .await
        .unwrap();

    // Second-nearest takes it
    tokio::time::sleep(Duration::from_millis(100)).await;
    state
        .respond_to_offer("drv-mid", &trip_id, OfferDecision::Accept)
        .await
        .unwrap();

    state.mark_en_route("drv-mid", &trip_id).await.unwrap();
    state.start_trip("drv-mid", &trip_id).await.unwrap();
    state.mark_trip_completed(&trip_id).await.unwrap();

    let summary = state.earnings_summary("drv-mid").await;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("summary serializes")
    );

    let trip = state.trip(&trip_id).await.unwrap();
    tracing::info!(
        "final state: {} with {} offers in history",
        trip.status,
        trip.offer_history.len()
    );
}
