//! Valve servo control. The `hw` feature gates the real rppal PWM driver;
//! without it, a mock implementation logs position changes.
//!
//! The servo remembers its commanded position so the next telemetry frame
//! can carry it as confirmation back to the gateway.

use anyhow::Result;
use tracing::info;

use loravalve_link::{ValveCommand, ValveState};

#[cfg(feature = "hw")]
use std::time::Duration;

#[cfg(feature = "hw")]
use rppal::pwm::{Channel, Polarity, Pwm};

// ---------------------------------------------------------------------------
// Real servo (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

/// Standard hobby-servo timing: 20 ms frame, ~544 µs at 0° (closed) and
/// ~1472 µs at 90° (open).
#[cfg(feature = "hw")]
const SERVO_PERIOD: Duration = Duration::from_millis(20);
#[cfg(feature = "hw")]
const PULSE_CLOSED: Duration = Duration::from_micros(544);
#[cfg(feature = "hw")]
const PULSE_OPEN: Duration = Duration::from_micros(1472);

#[cfg(feature = "hw")]
pub struct ValveServo {
    pwm: Pwm,
    position: ValveState,
}

#[cfg(feature = "hw")]
impl ValveServo {
    /// Claim the hardware PWM channel and drive the valve closed.
    pub fn new() -> Result<Self> {
        let pwm = Pwm::with_period(
            Channel::Pwm0,
            SERVO_PERIOD,
            PULSE_CLOSED,
            Polarity::Normal,
            true,
        )?;
        info!("valve servo initialised (closed)");
        Ok(Self {
            pwm,
            position: ValveState::Closed,
        })
    }

    pub fn apply(&mut self, cmd: ValveCommand) {
        let pulse = match cmd {
            ValveCommand::Open => PULSE_OPEN,
            ValveCommand::Close => PULSE_CLOSED,
        };
        if let Err(e) = self.pwm.set_pulse_width(pulse) {
            tracing::error!(%cmd, "servo pulse update failed: {e}");
        }
        self.position = cmd.into();
        info!(%cmd, "valve moved");
    }

    pub fn state(&self) -> ValveState {
        self.position
    }
}

// ---------------------------------------------------------------------------
// Mock servo (development — no hardware, logs position changes)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "hw"))]
pub struct ValveServo {
    position: ValveState,
}

#[cfg(not(feature = "hw"))]
impl ValveServo {
    pub fn new() -> Result<Self> {
        info!("[mock-servo] valve initialised (closed, not wired)");
        Ok(Self {
            position: ValveState::Closed,
        })
    }

    pub fn apply(&mut self, cmd: ValveCommand) {
        self.position = cmd.into();
        info!(%cmd, "[mock-servo] valve moved");
    }

    pub fn state(&self) -> ValveState {
        self.position
    }
}

// ===========================================================================
// Tests
// ===========================================================================
