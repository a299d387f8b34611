pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::DispatchConfig;
pub use errors::{DispatchError, DispatchResult};
pub use services::dispatch_service::OfferDecision;
pub use services::events::{DispatchEvents, LoggingEvents};
pub use state::AppState;
