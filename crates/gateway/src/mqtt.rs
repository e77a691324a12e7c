//! MQTT topics, payload parsing, and the published telemetry record.
//!
//! Control channels carry bare plain-text payloads (`TRUE`, `FALSE`, an
//! integer) so they stay usable from any broker dashboard; structure only
//! exists on the outbound telemetry record.

use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

use loravalve_link::{TelemetrySnapshot, Weather};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Structured telemetry records, gateway → sink.
pub const TOPIC_TELEMETRY: &str = "field/telemetry";
/// Bare `OPEN`/`CLOSE`, published whenever a frame carries a valve field.
pub const TOPIC_VALVE_STATE: &str = "field/valve";
/// Manual valve commands, sink → gateway: `TRUE`/`FALSE`.
pub const TOPIC_CMD_SET: &str = "control/valve/set";
/// Soil-moisture threshold updates: an unsigned integer string.
pub const TOPIC_THRESHOLD_SET: &str = "control/threshold/set";
/// Control mode: `TRUE` = automatic, `FALSE` = manual.
pub const TOPIC_MODE_SET: &str = "control/mode/set";

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Parse a `TRUE`/`FALSE` payload into a bool (case-insensitive, trims
/// whitespace).
pub fn parse_switch(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!("unknown switch payload '{s}'")),
    }
}

/// Parse a soil-threshold payload: an unsigned integer string, anything
/// else (including empty) is ignored by the caller.
pub fn parse_threshold(payload: &[u8]) -> Option<f32> {
    String::from_utf8_lossy(payload)
        .trim()
        .parse::<u32>()
        .ok()
        .map(|v| v as f32)
}

// ---------------------------------------------------------------------------
// Telemetry record
// ---------------------------------------------------------------------------

/// One published telemetry record. Numerics the snapshot does not carry
/// serialize as `null` rather than being invented.
#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    pub weather: String,
    pub temp: Option<f32>,
    pub hum: Option<f32>,
    pub light: Option<f32>,
    pub moist: Option<f32>,
    pub timestamp: String,
}

impl TelemetryRecord {
    pub fn from_snapshot(snap: &TelemetrySnapshot, timestamp: String) -> Self {
        let weather = match snap.weather {
            Weather::Clear => "Clear",
            Weather::Raining => "Raining",
            Weather::Unknown => "Unknown",
        };
        Self {
            weather: weather.to_string(),
            temp: finite(snap.temp_c),
            hum: finite(snap.humidity_pct),
            light: finite(snap.light_level),
            moist: finite(snap.soil_moisture_pct),
            timestamp,
        }
    }
}

fn finite(v: f32) -> Option<f32> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// `YYYY-MM-DD HH:MM:SS`, or an error token when the clock cannot be
/// formatted. Never panics on the publish path.
pub fn timestamp_now() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(format)
        .unwrap_or_else(|_| "time unsynced".to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
