// src/utils/id_generator.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    Driver,
    Trip,
    Earnings,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::Driver => "drv",
            IdType::Trip => "trp",
            IdType::Earnings => "ern",
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{date}-{random_suffix}
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string();
        let random_suffix = Self::generate_suffix(6);

        format!("{}-{}-{}", id_type.to_prefix(), date_part, random_suffix)
    }

    fn generate_suffix(n: usize) -> String {
        use rand::Rng;
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| {
                let idx = rng.gen_range(0..CHARS.len());
                CHARS[idx] as char
            })
            .collect()
    }

    /// Validate if an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        let parts: Vec<&str> = id.split('-').collect();
        if parts.len() != 3 {
            return false;
        }

        let id_type = match parts[0] {
            "drv" => IdType::Driver,
            "trp" => IdType::Trip,
            "ern" => IdType::Earnings,
            _ => return false,
        };

        if parts[1].len() != 6 || !parts[1].chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        if parts[2].is_empty() {
            return false;
        }

        match expected_type {
            Some(expected) => id_type == expected,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let driver_id = IdGenerator::generate(IdType::Driver);
        assert!(driver_id.starts_with("drv-"));
        assert_eq!(driver_id.split('-').count(), 3);

        let trip_id = IdGenerator::generate(IdType::Trip);
        assert!(trip_id.starts_with("trp-"));
    }

    #[test]
    fn test_validation() {
        let id = IdGenerator::generate(IdType::Trip);
        assert!(IdGenerator::validate_id(&id, Some(IdType::Trip)));
        assert!(!IdGenerator::validate_id(&id, Some(IdType::Driver)));
        assert!(IdGenerator::validate_id(&id, None));

        assert!(!IdGenerator::validate_id("invalid-format", None));
        assert!(!IdGenerator::validate_id("trp-abc123-xyz", None));
    }
}
