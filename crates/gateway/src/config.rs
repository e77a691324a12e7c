//! Env-driven gateway configuration.

use std::env;
use std::str::FromStr;

use crate::policy::{DEFAULT_SOIL_THRESHOLD_PCT, DEFAULT_SUNLIGHT_CEILING, Thresholds};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Startup soil threshold; adjustable afterwards over MQTT.
    pub soil_threshold_pct: f32,
    /// Fixed for the life of the process.
    pub sunlight_ceiling: f32,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            mqtt_host: env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            mqtt_port: parse_or(env::var("MQTT_PORT").ok(), 1883),
            soil_threshold_pct: parse_or(
                env::var("SOIL_THRESHOLD_PCT").ok(),
                DEFAULT_SOIL_THRESHOLD_PCT,
            ),
            sunlight_ceiling: parse_or(
                env::var("SUNLIGHT_CEILING").ok(),
                DEFAULT_SUNLIGHT_CEILING,
            ),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            soil_moisture_pct: self.soil_threshold_pct,
            sunlight_ceiling: self.sunlight_ceiling,
        }
    }
}

/// Parse an optional env value, falling back to `default` when the
/// variable is unset or malformed.
fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

// ===========================================================================
// Tests
// ===========================================================================
