//! Garden environment simulator for local development.
//!
//! Produces calibrated readings with enough texture to exercise the whole
//! control path: temporal coherence via a random walk, gradual drying,
//! closed-loop soil response while the valve is open, a compressed
//! day/night light cycle, rain spells, and optional DHT dropouts for the
//! skip-a-cycle path.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sensors::{SensorFrame, SensorSuite};

/// Compressed day length so a dev session sees the full light range.
const DIURNAL_PERIOD_S: f64 = 600.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) with the Irwin-Hall method: sum of 12
/// uniform [0,1) values minus 6.
fn approx_std_normal() -> f32 {
    let mut sum: f32 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f32();
    }
    sum - 6.0
}

fn gaussian(mean: f32, sigma: f32) -> f32 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range, steadily dries out. Will cross any sensible
    /// threshold and trigger irrigation.
    Drying,
    /// Hovers comfortably moist. Good for watching the link without the
    /// gateway ever commanding the valve.
    Stable,
    /// Starts saturated with occasional rain spells. Exercises the
    /// weather guard.
    Wet,
    /// Like Drying but with frequent DHT read failures, for the
    /// skip-and-retry path.
    FlakyDht,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "wet" => Self::Wet,
            "flaky-dht" | "flaky" => Self::FlakyDht,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Wet => write!(f, "wet"),
            Self::FlakyDht => write!(f, "flaky-dht"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Stateful garden simulator. Implements [`SensorSuite`] so the controller
/// cannot tell it from real hardware.
pub struct GardenSim {
    moisture_pct: f32,
    drying_per_sample: f32,
    walk_sigma: f32,
    temp_base_c: f32,
    hum_base_pct: f32,
    dht_fail_prob: f32,
    rain_prob: f32,
    /// Samples left in the current rain spell.
    rain_left: u32,
    watering: bool,
    wet_per_sample: f32,
}

impl GardenSim {
    pub fn new(scenario: Scenario) -> Self {
        let (start_moisture, drying, walk_sigma, dht_fail_prob, rain_prob) = match scenario {
            Scenario::Drying => (45.0, 0.4, 0.5, 0.01, 0.0),
            Scenario::Stable => (55.0, 0.05, 0.3, 0.0, 0.005),
            Scenario::Wet => (80.0, 0.1, 0.4, 0.0, 0.05),
            Scenario::FlakyDht => (45.0, 0.4, 0.5, 0.25, 0.0),
        };

        Self {
            moisture_pct: start_moisture,
            drying_per_sample: drying,
            walk_sigma,
            temp_base_c: 24.0,
            hum_base_pct: 60.0,
            dht_fail_prob,
            rain_prob,
            rain_left: 0,
            watering: false,
            wet_per_sample: 2.5,
        }
    }

    /// Sinusoidal day/night light level on the 0–10 scale.
    fn light_now(&self) -> f32 {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / DIURNAL_PERIOD_S;
        let level = 5.0 + 5.0 * phase.sin() as f32 + gaussian(0.0, 0.2);
        level.clamp(0.0, 10.0)
    }
}

impl SensorSuite for GardenSim {
    fn sample(&mut self) -> SensorFrame {
        // Rain spells are sticky for a handful of samples.
        if self.rain_left > 0 {
            self.rain_left -= 1;
        } else if fastrand::f32() < self.rain_prob {
            self.rain_left = 5;
        }
        let raining = self.rain_left > 0;

        // Soil walk: drying drift down, watering and rain push back up.
        let wet = if self.watering { self.wet_per_sample } else { 0.0 };
        let rain_wet = if raining { 1.5 } else { 0.0 };
        self.moisture_pct = (self.moisture_pct - self.drying_per_sample
            + wet
            + rain_wet
            + gaussian(0.0, self.walk_sigma))
        .clamp(0.0, 100.0);

        // The DHT fails as a unit: both readings NaN or neither.
        let (temp_c, humidity_pct) = if fastrand::f32() < self.dht_fail_prob {
            (f32::NAN, f32::NAN)
        } else {
            (
                self.temp_base_c + gaussian(0.0, 0.3),
                (self.hum_base_pct + gaussian(0.0, 1.0)).clamp(0.0, 100.0),
            )
        };

        SensorFrame {
            temp_c,
            humidity_pct,
            light_level: self.light_now(),
            soil_moisture_pct: self.moisture_pct,
            raining,
        }
    }

    fn valve_changed(&mut self, open: bool) {
        self.watering = open;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
