// src/config.rs
//
// All tunables in one place. Every field has a serde default so hosts can
// deserialize a partial config; `DispatchConfig::default()` is the documented
// baseline.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// How long a driver has to answer an offer before it times out.
    #[serde(default = "default_offer_timeout_secs")]
    pub offer_timeout_secs: u64,

    /// Initial candidate search radius around the pickup point.
    #[serde(default = "default_search_radius_km")]
    pub search_radius_km: f64,

    /// Radius multiplier applied per expansion round.
    #[serde(default = "default_radius_multiplier")]
    pub radius_multiplier: f64,

    /// Maximum number of search rounds (including the first).
    #[serde(default = "default_max_expansion_rounds")]
    pub max_expansion_rounds: u32,

    /// A driver with no location sample for this long is excluded from
    /// candidacy until a fresh one arrives.
    #[serde(default = "default_location_staleness_secs")]
    pub location_staleness_secs: u64,

    /// Samples reporting worse accuracy than this are discarded as jitter.
    #[serde(default = "default_max_sample_accuracy_m")]
    pub max_sample_accuracy_m: f64,

    /// Location samples retained per driver (ring buffer capacity).
    #[serde(default = "default_location_buffer_size")]
    pub location_buffer_size: usize,

    /// Queued offline actions older than this are dropped instead of replayed.
    #[serde(default = "default_offline_retention_secs")]
    pub offline_retention_secs: u64,

    /// Assumed travel speed for ETA ranking, in km/h. Ranking only.
    #[serde(default = "default_assumed_speed_kmh")]
    pub assumed_speed_kmh: f64,

    #[serde(default)]
    pub pricing: PricingConfig,
}

/// Fare parameters: base fare plus distance and time components.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_base_fare")]
    pub base_fare: f64,
    #[serde(default = "default_per_km_rate")]
    pub per_km_rate: f64,
    #[serde(default = "default_per_minute_rate")]
    pub per_minute_rate: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_offer_timeout_secs() -> u64 {
    15
}

fn default_search_radius_km() -> f64 {
    5.0
}

fn default_radius_multiplier() -> f64 {
    2.0
}

fn default_max_expansion_rounds() -> u32 {
    3
}

fn default_location_staleness_secs() -> u64 {
    45
}

fn default_max_sample_accuracy_m() -> f64 {
    100.0
}

fn default_location_buffer_size() -> usize {
    32
}

fn default_offline_retention_secs() -> u64 {
    600
}

fn default_assumed_speed_kmh() -> f64 {
    30.0
}

fn default_base_fare() -> f64 {
    2.50
}

fn default_per_km_rate() -> f64 {
    1.50
}

fn default_per_minute_rate() -> f64 {
    0.20
}

fn default_currency() -> String {
    "GHS".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_timeout_secs: default_offer_timeout_secs(),
            search_radius_km: default_search_radius_km(),
            radius_multiplier: default_radius_multiplier(),
            max_expansion_rounds: default_max_expansion_rounds(),
            location_staleness_secs: default_location_staleness_secs(),
            max_sample_accuracy_m: default_max_sample_accuracy_m(),
            location_buffer_size: default_location_buffer_size(),
            offline_retention_secs: default_offline_retention_secs(),
            assumed_speed_kmh: default_assumed_speed_kmh(),
            pricing: PricingConfig::default(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare: default_base_fare(),
            per_km_rate: default_per_km_rate(),
            per_minute_rate: default_per_minute_rate(),
            currency: default_currency(),
        }
    }
}

impl DispatchConfig {
    pub fn offer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn location_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.location_staleness_secs as i64)
    }

    pub fn offline_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offline_retention_secs as i64)
    }

    pub fn assumed_speed_mps(&self) -> f64 {
        self.assumed_speed_kmh / 3.6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.offer_timeout_secs, 15);
        assert_eq!(config.search_radius_km, 5.0);
        assert_eq!(config.max_expansion_rounds, 3);
        assert_eq!(config.location_staleness_secs, 45);
        assert_eq!(config.offline_retention_secs, 600);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"offer_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.offer_timeout_secs, 30);
        // Untouched fields keep their defaults
        assert_eq!(config.search_radius_km, 5.0);
        assert_eq!(config.pricing.base_fare, 2.50);
    }

    #[test]
    fn test_speed_conversion() {
        let config = DispatchConfig::default();
        assert!((config.assumed_speed_mps() - 30.0 / 3.6).abs() < 1e-9);
    }
}
