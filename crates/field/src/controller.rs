//! Field node control loop.
//!
//! One cooperative loop multiplexes the two jobs of the node over the
//! single half-duplex channel: transmit a telemetry frame every period,
//! listen for valve commands the rest of the time. Transmitting is kept as
//! short as the airtime bound allows, and every transmit path ends by
//! re-arming receive — even when the sensors or the send fail.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use loravalve_link::{
    decode_command, encode_telemetry, RadioLink, TelemetrySnapshot, Transceiver, ValveCommand,
    Weather,
};

use crate::sensors::{SensorFrame, SensorSuite};
use crate::servo::ValveServo;

pub struct FieldController<T: Transceiver, S: SensorSuite> {
    link: RadioLink<T>,
    sensors: S,
    servo: ValveServo,
    period: Duration,
}

impl<T: Transceiver, S: SensorSuite> FieldController<T, S> {
    pub fn new(link: RadioLink<T>, sensors: S, servo: ValveServo, period: Duration) -> Self {
        Self {
            link,
            sensors,
            servo,
            period,
        }
    }

    /// Run forever. The packet signal is the only asynchronous event; a
    /// frame is fully decoded and acted on before the loop returns to
    /// waiting, so inbound packets are handled strictly one at a time.
    pub async fn run(mut self) -> ! {
        let signal = self.link.signal();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_s = self.period.as_secs(), "field controller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.telemetry_tick().await,
                _ = signal.wait() => self.drain_inbound(),
            }
        }
    }

    /// One telemetry period: sample, encode, transmit, re-arm receive.
    async fn telemetry_tick(&mut self) {
        let frame = self.sensors.sample();

        // A dead DHT voids the cycle. No retry until the next period; the
        // link stays on the listen path the whole time.
        if !frame.dht_ok() {
            warn!("dht read failed — skipping this cycle");
            return;
        }

        let snapshot = self.build_snapshot(&frame);
        let packet = encode_telemetry(&snapshot);

        if let Err(e) = self.link.begin_transmit().await {
            error!("could not enter transmit mode: {e}");
        }
        match self.link.transmit(packet.as_bytes()).await {
            Ok(()) => info!(pkt = %packet, "telemetry sent"),
            Err(e) => warn!("telemetry send failed: {e}"),
        }
        // Unconditional: the node must never be left off the listen path.
        if let Err(e) = self.link.start_receiving().await {
            error!("could not re-arm receive: {e}");
        }
    }

    /// Drain every pending inbound frame and apply valid valve commands.
    fn drain_inbound(&mut self) {
        while let Some(frame) = self.link.take_frame() {
            match decode_command(&frame) {
                Some(cmd) => {
                    info!(%cmd, "command received");
                    self.servo.apply(cmd);
                    self.sensors.valve_changed(cmd == ValveCommand::Open);
                }
                None => {
                    debug!(len = frame.len(), "ignoring unrecognized frame");
                }
            }
        }
    }

    /// Current servo position rides along as provenance so the gateway can
    /// confirm its last command took effect.
    fn build_snapshot(&self, frame: &SensorFrame) -> TelemetrySnapshot {
        TelemetrySnapshot {
            weather: if frame.raining {
                Weather::Raining
            } else {
                Weather::Clear
            },
            temp_c: frame.temp_c,
            humidity_pct: frame.humidity_pct,
            light_level: frame.light_level,
            soil_moisture_pct: frame.soil_moisture_pct,
            valve: self.servo.state(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
