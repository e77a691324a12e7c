//! Telemetry and command wire codec.
//!
//! The air protocol is pipe-delimited tagged text in a fixed field order:
//!
//! ```text
//! Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:28|Valve:OPEN
//! ```
//!
//! The `Valve:` field is optional (not every node drives an actuator).
//! Commands travel the other way as `CMD:TRUE` / `CMD:FALSE`.
//!
//! Decoding is deliberately forgiving: the channel is lossy and frames
//! arrive with noise bytes, so non-printable characters are stripped, each
//! tag is located by substring search, and anything missing or unparsable
//! simply leaves that field "not updated" (NaN for numerics, `Unknown` for
//! enums). Decoding never fails.

use std::fmt;

// ---------------------------------------------------------------------------
// Enums at the wire boundary
// ---------------------------------------------------------------------------

/// Weather as reported by the field node's rain sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weather {
    Clear,
    Raining,
    /// Not carried by the last frame.
    Unknown,
}

/// Reported valve position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Open,
    Closed,
    /// Not carried by the last frame.
    Unknown,
}

impl ValveState {
    /// Wire form as published on the valve-state channel.
    pub fn wire(&self) -> Option<&'static str> {
        match self {
            ValveState::Open => Some("OPEN"),
            ValveState::Closed => Some("CLOSE"),
            ValveState::Unknown => None,
        }
    }
}

/// A command for the field node's valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    Open,
    Close,
}

impl fmt::Display for ValveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValveCommand::Open => write!(f, "open"),
            ValveCommand::Close => write!(f, "close"),
        }
    }
}

impl From<ValveCommand> for ValveState {
    fn from(cmd: ValveCommand) -> Self {
        match cmd {
            ValveCommand::Open => ValveState::Open,
            ValveCommand::Close => ValveState::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry snapshot
// ---------------------------------------------------------------------------

/// One decoded telemetry frame, possibly sparse.
///
/// NaN numerics and `Unknown` enums mean "this frame did not carry the
/// field". Holders keep a running snapshot and fold updates in with
/// [`merge_from`](Self::merge_from), so a partial frame never wipes out
/// previously known values.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub weather: Weather,
    pub temp_c: f32,
    pub humidity_pct: f32,
    /// Light intensity on the node's 0–10 scale.
    pub light_level: f32,
    pub soil_moisture_pct: f32,
    pub valve: ValveState,
}

impl TelemetrySnapshot {
    /// A snapshot with every field unset.
    pub fn empty() -> Self {
        Self {
            weather: Weather::Unknown,
            temp_c: f32::NAN,
            humidity_pct: f32::NAN,
            light_level: f32::NAN,
            soil_moisture_pct: f32::NAN,
            valve: ValveState::Unknown,
        }
    }

    /// Fold a (possibly sparse) update into this snapshot. Only fields the
    /// update actually carries overwrite; everything else persists.
    pub fn merge_from(&mut self, update: &TelemetrySnapshot) {
        if update.weather != Weather::Unknown {
            self.weather = update.weather;
        }
        if !update.temp_c.is_nan() {
            self.temp_c = update.temp_c;
        }
        if !update.humidity_pct.is_nan() {
            self.humidity_pct = update.humidity_pct;
        }
        if !update.light_level.is_nan() {
            self.light_level = update.light_level;
        }
        if !update.soil_moisture_pct.is_nan() {
            self.soil_moisture_pct = update.soil_moisture_pct;
        }
        if update.valve != ValveState::Unknown {
            self.valve = update.valve;
        }
    }

    /// True when every numeric field is populated. Consumers that act on
    /// temperature/humidity must check this before trusting the values.
    pub fn is_complete(&self) -> bool {
        !self.temp_c.is_nan()
            && !self.humidity_pct.is_nan()
            && !self.light_level.is_nan()
            && !self.soil_moisture_pct.is_nan()
    }

    /// True when the fields the irrigation verdict needs are all present.
    pub fn has_decision_fields(&self) -> bool {
        self.weather != Weather::Unknown
            && !self.light_level.is_nan()
            && !self.soil_moisture_pct.is_nan()
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Telemetry encode / decode
// ---------------------------------------------------------------------------

/// Encode a snapshot in the fixed field order, skipping unset fields.
/// Field values must not contain `|`; nothing here produces one.
pub fn encode_telemetry(snap: &TelemetrySnapshot) -> String {
    let mut fields: Vec<String> = Vec::with_capacity(6);

    match snap.weather {
        Weather::Clear => fields.push("Weather:Clear".to_string()),
        Weather::Raining => fields.push("Weather:Raining".to_string()),
        Weather::Unknown => {}
    }
    if !snap.temp_c.is_nan() {
        fields.push(format!("Temp:{:.1}", snap.temp_c));
    }
    if !snap.humidity_pct.is_nan() {
        fields.push(format!("Hum:{:.1}", snap.humidity_pct));
    }
    if !snap.light_level.is_nan() {
        fields.push(format!("Light level:{:.1}", snap.light_level));
    }
    if !snap.soil_moisture_pct.is_nan() {
        fields.push(format!("Moisture:{}", snap.soil_moisture_pct.round() as i32));
    }
    if let Some(v) = snap.valve.wire() {
        fields.push(format!("Valve:{v}"));
    }

    fields.join("|")
}

/// Decode one inbound frame into a (possibly sparse) snapshot.
///
/// Synonym tags are accepted for robustness: humidity under `Hum:` or
/// `Hm:`, light under `Light level:`, `Lux:` or `Lx:`.
pub fn decode_telemetry(frame: &[u8]) -> TelemetrySnapshot {
    let text = sanitize(frame);

    let mut snap = TelemetrySnapshot::empty();

    if let Some(v) = scan_value(&text, &["Weather:"]) {
        if v.eq_ignore_ascii_case("Raining") {
            snap.weather = Weather::Raining;
        } else if v.eq_ignore_ascii_case("Clear") {
            snap.weather = Weather::Clear;
        }
    }

    snap.temp_c = scan_number(&text, &["Temp:"]);
    snap.humidity_pct = scan_number(&text, &["Hum:", "Hm:"]);
    snap.light_level = scan_number(&text, &["Light level:", "Lux:", "Lx:"]);
    snap.soil_moisture_pct = scan_number(&text, &["Moisture:"]);

    if let Some(v) = scan_value(&text, &["Valve:"]) {
        if v.eq_ignore_ascii_case("OPEN") {
            snap.valve = ValveState::Open;
        } else if v.eq_ignore_ascii_case("CLOSE") {
            snap.valve = ValveState::Closed;
        }
    }

    snap
}

/// Keep only printable ASCII; the radio hands up the occasional noise byte.
fn sanitize(frame: &[u8]) -> String {
    frame
        .iter()
        .filter(|b| (0x20..=0x7e).contains(*b))
        .map(|&b| b as char)
        .collect()
}

/// Locate the first of `tags` in `text` and return the value that follows,
/// up to the next `|`, `,`, or end of string.
fn scan_value<'a>(text: &'a str, tags: &[&str]) -> Option<&'a str> {
    for tag in tags {
        if let Some(pos) = text.find(tag) {
            let rest = &text[pos + tag.len()..];
            let end = rest.find(|c| c == '|' || c == ',').unwrap_or(rest.len());
            return Some(rest[..end].trim());
        }
    }
    None
}

fn scan_number(text: &str, tags: &[&str]) -> f32 {
    scan_value(text, tags)
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(f32::NAN)
}

// ---------------------------------------------------------------------------
// Command encode / decode
// ---------------------------------------------------------------------------

/// Wire form of a valve command.
pub fn encode_command(cmd: ValveCommand) -> &'static str {
    match cmd {
        ValveCommand::Open => "CMD:TRUE",
        ValveCommand::Close => "CMD:FALSE",
    }
}

/// Parse an inbound command frame. Case-insensitive after trimming;
/// anything unrecognized is `None` — dropped, not an error.
pub fn decode_command(frame: &[u8]) -> Option<ValveCommand> {
    let text = sanitize(frame);
    let text = text.trim();
    if text.eq_ignore_ascii_case("CMD:TRUE") {
        Some(ValveCommand::Open)
    } else if text.eq_ignore_ascii_case("CMD:FALSE") {
        Some(ValveCommand::Close)
    } else {
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
