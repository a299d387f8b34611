// src/services/mod.rs
pub mod dispatch_service;
pub mod earnings_service;
pub mod events;
pub mod location_service;
pub mod offline_service;
pub mod session_service;
pub mod trip_service;
