//! The irrigation verdict.
//!
//! Pure and stateless: irrigate only when the soil is dry, it is not
//! already raining, and the light is not so intense that evaporation would
//! defeat the watering (the "too sunny" guard). Whether a verdict is worth
//! transmitting is the caller's business — hysteresis lives there, which
//! keeps this function trivially testable.

use loravalve_link::{TelemetrySnapshot, ValveCommand, Weather};

pub const DEFAULT_SOIL_THRESHOLD_PCT: f32 = 30.0;
pub const DEFAULT_SUNLIGHT_CEILING: f32 = 9.0;

/// Runtime decision inputs. The soil threshold is adjustable over MQTT;
/// the sunlight ceiling is fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub soil_moisture_pct: f32,
    /// Light level (0–10 scale) above which irrigation is pointless.
    pub sunlight_ceiling: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            soil_moisture_pct: DEFAULT_SOIL_THRESHOLD_PCT,
            sunlight_ceiling: DEFAULT_SUNLIGHT_CEILING,
        }
    }
}

/// Decide the valve position for the current snapshot.
///
/// NaN moisture or light can never satisfy the open conditions, so unknown
/// data always verdicts Close — the link never irrigates blind.
pub fn desired_command(snapshot: &TelemetrySnapshot, thresholds: &Thresholds) -> ValveCommand {
    let dry = snapshot.soil_moisture_pct < thresholds.soil_moisture_pct;
    let raining = snapshot.weather == Weather::Raining;
    let mild_light = snapshot.light_level <= thresholds.sunlight_ceiling;

    if dry && !raining && mild_light {
        ValveCommand::Open
    } else {
        ValveCommand::Close
    }
}

// ===========================================================================
// Tests
// ===========================================================================
