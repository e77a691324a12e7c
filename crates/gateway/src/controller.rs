//! Gateway control loop: bridge the radio link to MQTT and run the
//! irrigation decision.
//!
//! One cooperative loop selects over the MQTT event stream and the radio's
//! packet signal. Inbound telemetry is merged into the held snapshot,
//! published, and (in automatic mode) fed to the policy; commands go back
//! out as a fixed-size burst because the channel is lossy and there is no
//! acknowledgment — repetition is the only redundancy.
//!
//! ## Mode arbitration
//!
//! ```text
//! Automatic: telemetry ──▶ policy ──[verdict changed]──▶ burst
//! Manual:    control/valve/set ──[TRUE/FALSE]──▶ burst
//! ```
//!
//! `last_command` tracks the last command actually transmitted, in either
//! mode, so flipping back to automatic never re-fires a stale verdict.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Packet, QoS};
use tracing::{debug, error, info, warn};

use loravalve_link::{
    decode_telemetry, encode_command, RadioLink, TelemetrySnapshot, Transceiver, ValveCommand,
};

use crate::mqtt::{
    parse_switch, parse_threshold, timestamp_now, TelemetryRecord, TOPIC_CMD_SET, TOPIC_MODE_SET,
    TOPIC_TELEMETRY, TOPIC_THRESHOLD_SET, TOPIC_VALVE_STATE,
};
use crate::policy::{desired_command, Thresholds};

/// How many times each command is repeated on the air.
const CMD_BURST: u32 = 3;
/// Pause between burst repetitions, on top of each frame's airtime.
const BURST_GAP: Duration = Duration::from_millis(50);
/// Backoff after an MQTT connection error before the next poll.
const MQTT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Who is allowed to issue valve commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Automatic,
    Manual,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// All mutable gateway state, owned by the control loop and mutated only
/// between its suspension points — no locking anywhere.
pub struct GatewayContext {
    /// Running snapshot; partial frames update only the fields they carry.
    pub snapshot: TelemetrySnapshot,
    pub mode: ControlMode,
    pub thresholds: Thresholds,
    /// Last command actually transmitted. Change detection only — never
    /// consulted for actuation.
    pub last_command: ValveCommand,
}

impl GatewayContext {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            snapshot: TelemetrySnapshot::empty(),
            mode: ControlMode::Automatic,
            thresholds,
            last_command: ValveCommand::Close,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct GatewayController<T: Transceiver> {
    link: RadioLink<T>,
    mqtt: AsyncClient,
    ctx: GatewayContext,
}

impl<T: Transceiver> GatewayController<T> {
    pub fn new(link: RadioLink<T>, mqtt: AsyncClient, thresholds: Thresholds) -> Self {
        Self {
            link,
            mqtt,
            ctx: GatewayContext::new(thresholds),
        }
    }

    /// Run forever. Each inbound packet is fully decoded and acted upon
    /// before the loop waits again, so packets are never interleaved.
    pub async fn run(mut self, mut eventloop: EventLoop) -> ! {
        let signal = self.link.signal();
        info!("gateway controller started");

        loop {
            tokio::select! {
                event = eventloop.poll() => self.on_mqtt_event(event).await,
                _ = signal.wait() => self.on_radio_ready().await,
            }
        }
    }

    // -- MQTT side -----------------------------------------------------------

    async fn on_mqtt_event(&mut self, event: Result<Event, ConnectionError>) {
        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.clone();
                self.on_control_message(&topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                // Reconnecting is the event loop's job; just don't spin.
                error!("mqtt error: {e}. retrying...");
                tokio::time::sleep(MQTT_RETRY_DELAY).await;
            }
        }
    }

    async fn on_control_message(&mut self, topic: &str, payload: &[u8]) {
        match topic {
            TOPIC_CMD_SET => {
                if self.ctx.mode != ControlMode::Manual {
                    debug!("manual command ignored while automatic");
                    return;
                }
                match parse_switch(payload) {
                    Ok(open) => {
                        let cmd = if open {
                            ValveCommand::Open
                        } else {
                            ValveCommand::Close
                        };
                        info!(%cmd, "manual command accepted");
                        self.ctx.last_command = cmd;
                        self.burst_command(cmd).await;
                    }
                    Err(msg) => warn!("{msg} (use TRUE/FALSE)"),
                }
            }
            TOPIC_THRESHOLD_SET => match parse_threshold(payload) {
                Some(v) => {
                    self.ctx.thresholds.soil_moisture_pct = v;
                    info!(threshold_pct = v, "soil threshold updated");
                }
                None => warn!("ignoring invalid soil threshold payload"),
            },
            TOPIC_MODE_SET => match parse_switch(payload) {
                Ok(true) => {
                    self.ctx.mode = ControlMode::Automatic;
                    info!("control mode: automatic");
                }
                Ok(false) => {
                    self.ctx.mode = ControlMode::Manual;
                    info!("control mode: manual");
                }
                Err(msg) => warn!("{msg} (use TRUE/FALSE)"),
            },
            other => debug!(topic = other, "unhandled topic"),
        }
    }

    // -- Radio side ----------------------------------------------------------

    async fn on_radio_ready(&mut self) {
        while let Some(frame) = self.link.take_frame() {
            self.handle_telemetry(&frame).await;
        }
    }

    async fn handle_telemetry(&mut self, frame: &[u8]) {
        let update = decode_telemetry(frame);
        self.ctx.snapshot.merge_from(&update);

        if update.has_decision_fields() {
            self.publish_snapshot().await;
        } else {
            debug!(
                len = frame.len(),
                "partial frame — holding prior values, not publishing"
            );
        }

        if let Some(state) = update.valve.wire() {
            if let Err(e) = self
                .mqtt
                .publish(TOPIC_VALVE_STATE, QoS::AtLeastOnce, false, state.as_bytes().to_vec())
                .await
            {
                warn!("valve state publish failed: {e}");
            }
        }

        if self.ctx.mode == ControlMode::Automatic {
            self.evaluate_policy().await;
        }
    }

    async fn publish_snapshot(&mut self) {
        let record = TelemetryRecord::from_snapshot(&self.ctx.snapshot, timestamp_now());
        let payload = match serde_json::to_vec(&record) {
            Ok(p) => p,
            Err(e) => {
                warn!("telemetry record serialization failed: {e}");
                return;
            }
        };
        match self
            .mqtt
            .publish(TOPIC_TELEMETRY, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => debug!("telemetry published"),
            Err(e) => warn!("telemetry publish failed: {e}"),
        }
    }

    // -- Decision & transmission ----------------------------------------------

    async fn evaluate_policy(&mut self) {
        let desired = desired_command(&self.ctx.snapshot, &self.ctx.thresholds);
        if desired == self.ctx.last_command {
            return; // unchanged verdict — stay quiet
        }

        info!(
            %desired,
            moisture = self.ctx.snapshot.soil_moisture_pct,
            threshold = self.ctx.thresholds.soil_moisture_pct,
            "verdict changed — issuing command"
        );
        self.ctx.last_command = desired;
        self.burst_command(desired).await;
    }

    /// Send `cmd` CMD_BURST times with a short gap, logging each attempt
    /// independently. No acknowledgment, no retry beyond the burst; the
    /// link is re-armed for receive no matter what happened.
    async fn burst_command(&mut self, cmd: ValveCommand) {
        let payload = encode_command(cmd);

        if let Err(e) = self.link.begin_transmit().await {
            error!("could not enter transmit mode: {e}");
        }
        for attempt in 1..=CMD_BURST {
            match self.link.transmit(payload.as_bytes()).await {
                Ok(()) => info!(attempt, %cmd, "command sent"),
                Err(e) => warn!(attempt, %cmd, "command send failed: {e}"),
            }
            if attempt < CMD_BURST {
                tokio::time::sleep(BURST_GAP).await;
            }
        }
        if let Err(e) = self.link.start_receiving().await {
            error!("could not re-arm receive: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use loravalve_link::{LinkMode, SimTransceiver, ValveState, Weather};

    /// Minimal MQTT client. The event loop is never polled, so publishes
    /// accumulate in the internal channel — sufficient for exercising the
    /// controller logic. The event loop must stay alive for the duration
    /// of the test so the channel remains open.
    fn test_mqtt() -> (AsyncClient, rumqttc::EventLoop) {
        let opts = rumqttc::MqttOptions::new("test-gateway", "127.0.0.1", 1883);
        AsyncClient::new(opts, 10)
    }

    /// Gateway controller on one end of a paired channel; the returned
    /// transceiver plays the field node and is already listening.
    fn test_controller() -> (
        GatewayController<SimTransceiver>,
        SimTransceiver,
        rumqttc::EventLoop,
    ) {
        let (gw_end, mut field_end) = SimTransceiver::pair();
        field_end.listen().unwrap();

        let link = RadioLink::new(gw_end).unwrap();
        let (mqtt, el) = test_mqtt();
        let ctrl = GatewayController::new(
            link,
            mqtt,
            Thresholds {
                soil_moisture_pct: 30.0,
                sunlight_ceiling: 9.0,
            },
        );
        (ctrl, field_end, el)
    }

    fn drain_strings(t: &mut SimTransceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = t.take_frame() {
            out.push(String::from_utf8(frame).unwrap());
        }
        out
    }

    const DRY_PACKET: &[u8] = b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:28";
    const MOIST_PACKET: &[u8] = b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:55";

    // -- automatic mode ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn dry_telemetry_triggers_open_burst() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.handle_telemetry(DRY_PACKET).await;

        let sent = drain_strings(&mut field);
        assert_eq!(sent, vec!["CMD:TRUE"; 3]);
        assert_eq!(ctrl.ctx.last_command, ValveCommand::Open);
        assert_eq!(ctrl.link.mode(), LinkMode::Receiving);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_verdict_transmits_at_most_once() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.handle_telemetry(DRY_PACKET).await;
        assert_eq!(drain_strings(&mut field).len(), 3);

        // Identical evaluation — hysteresis keeps the link quiet.
        ctrl.handle_telemetry(DRY_PACKET).await;
        assert!(drain_strings(&mut field).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn moist_soil_commands_nothing() {
        let (mut ctrl, mut field, _el) = test_controller();
        ctrl.handle_telemetry(MOIST_PACKET).await;
        assert!(drain_strings(&mut field).is_empty());
        assert_eq!(ctrl.ctx.last_command, ValveCommand::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn rain_blocks_irrigation() {
        let (mut ctrl, mut field, _el) = test_controller();
        ctrl.handle_telemetry(b"Weather:Raining|Temp:19.0|Hum:80.0|Light level:2.0|Moisture:10")
            .await;
        assert!(drain_strings(&mut field).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_issues_close_burst() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.handle_telemetry(DRY_PACKET).await;
        assert_eq!(drain_strings(&mut field), vec!["CMD:TRUE"; 3]);

        // Moisture back above threshold: verdict flips, one Close burst.
        ctrl.handle_telemetry(MOIST_PACKET).await;
        assert_eq!(drain_strings(&mut field), vec!["CMD:FALSE"; 3]);
        assert_eq!(ctrl.ctx.last_command, ValveCommand::Close);
    }

    // -- snapshot handling ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn snapshot_matches_decoded_packet() {
        let (mut ctrl, _field, _el) = test_controller();
        ctrl.handle_telemetry(DRY_PACKET).await;

        let snap = &ctrl.ctx.snapshot;
        assert_eq!(snap.weather, Weather::Clear);
        assert_eq!(snap.temp_c, 24.5);
        assert_eq!(snap.humidity_pct, 60.2);
        assert_eq!(snap.light_level, 3.0);
        assert_eq!(snap.soil_moisture_pct, 28.0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_frame_retains_prior_fields() {
        let (mut ctrl, _field, _el) = test_controller();

        ctrl.handle_telemetry(MOIST_PACKET).await;
        ctrl.handle_telemetry(b"Moisture:48").await;

        let snap = &ctrl.ctx.snapshot;
        assert_eq!(snap.soil_moisture_pct, 48.0);
        // Everything else survives from the earlier full frame.
        assert_eq!(snap.temp_c, 24.5);
        assert_eq!(snap.weather, Weather::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn valve_field_merges_into_snapshot() {
        let (mut ctrl, _field, _el) = test_controller();
        ctrl.handle_telemetry(
            b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:55|Valve:OPEN",
        )
        .await;
        assert_eq!(ctrl.ctx.snapshot.valve, ValveState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn noise_frame_changes_nothing() {
        let (mut ctrl, mut field, _el) = test_controller();
        ctrl.handle_telemetry(b"\x00\x01\x02||||").await;
        assert!(drain_strings(&mut field).is_empty());
        assert!(ctrl.ctx.snapshot.soil_moisture_pct.is_nan());
    }

    // -- runtime thresholds --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn threshold_update_changes_verdict() {
        let (mut ctrl, mut field, _el) = test_controller();

        // 48% is moist at the default 30% threshold.
        ctrl.handle_telemetry(b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:48")
            .await;
        assert!(drain_strings(&mut field).is_empty());

        ctrl.on_control_message(TOPIC_THRESHOLD_SET, b"50").await;
        assert_eq!(ctrl.ctx.thresholds.soil_moisture_pct, 50.0);

        // Same reading is now dry.
        ctrl.handle_telemetry(b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:48")
            .await;
        assert_eq!(drain_strings(&mut field), vec!["CMD:TRUE"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_threshold_payloads_ignored() {
        let (mut ctrl, _field, _el) = test_controller();

        for payload in [&b"abc"[..], &b""[..], &b"-5"[..], &b"30.5"[..]] {
            ctrl.on_control_message(TOPIC_THRESHOLD_SET, payload).await;
        }
        assert_eq!(ctrl.ctx.thresholds.soil_moisture_pct, 30.0);
    }

    // -- mode arbitration ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn manual_mode_suppresses_policy() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.on_control_message(TOPIC_MODE_SET, b"FALSE").await;
        assert_eq!(ctrl.ctx.mode, ControlMode::Manual);

        ctrl.handle_telemetry(DRY_PACKET).await;
        assert!(drain_strings(&mut field).is_empty());
        // Telemetry still merges for publication.
        assert_eq!(ctrl.ctx.snapshot.soil_moisture_pct, 28.0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_command_bursts_and_records() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.on_control_message(TOPIC_MODE_SET, b"FALSE").await;
        ctrl.on_control_message(TOPIC_CMD_SET, b"TRUE").await;

        assert_eq!(drain_strings(&mut field), vec!["CMD:TRUE"; 3]);
        assert_eq!(ctrl.ctx.last_command, ValveCommand::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_command_ignored_while_automatic() {
        let (mut ctrl, mut field, _el) = test_controller();

        ctrl.on_control_message(TOPIC_CMD_SET, b"TRUE").await;

        assert!(drain_strings(&mut field).is_empty());
        assert_eq!(ctrl.ctx.last_command, ValveCommand::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_roundtrip_does_not_refire_stale_verdict() {
        let (mut ctrl, mut field, _el) = test_controller();

        // Manual open, recorded as the last transmitted command.
        ctrl.on_control_message(TOPIC_MODE_SET, b"FALSE").await;
        ctrl.on_control_message(TOPIC_CMD_SET, b"TRUE").await;
        drain_strings(&mut field);

        // Back to automatic: the policy agrees with what was already sent,
        // so nothing new goes out.
        ctrl.on_control_message(TOPIC_MODE_SET, b"TRUE").await;
        ctrl.handle_telemetry(DRY_PACKET).await;
        assert!(drain_strings(&mut field).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_mode_payload_keeps_mode() {
        let (mut ctrl, _field, _el) = test_controller();
        ctrl.on_control_message(TOPIC_MODE_SET, b"AUTO").await;
        assert_eq!(ctrl.ctx.mode, ControlMode::Automatic);
    }

    // -- burst against loss --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn burst_survives_partial_loss() {
        let (gw_end, mut field_end) = SimTransceiver::pair();
        field_end.listen().unwrap();
        // Two of the three repetitions evaporate on the air; one lands.
        // That is the whole point of the burst.
        gw_end.set_drop_next(2);

        let link = RadioLink::new(gw_end).unwrap();
        let (mqtt, _el) = test_mqtt();
        let mut ctrl = GatewayController::new(link, mqtt, Thresholds::default());

        ctrl.on_control_message(TOPIC_MODE_SET, b"FALSE").await;
        ctrl.on_control_message(TOPIC_CMD_SET, b"TRUE").await;

        assert_eq!(drain_strings(&mut field_end), vec!["CMD:TRUE"]);
    }

    // -- end to end ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn field_scenario_end_to_end() {
        let (mut ctrl, mut field, _el) = test_controller();

        // The field node airs the canonical dry reading.
        field.send(DRY_PACKET).unwrap();
        assert!(ctrl.link.signal().take());
        ctrl.on_radio_ready().await;

        // Exactly one open burst...
        assert_eq!(drain_strings(&mut field), vec!["CMD:TRUE"; 3]);

        // ...and silence while conditions hold...
        field.send(DRY_PACKET).unwrap();
        ctrl.on_radio_ready().await;
        assert!(drain_strings(&mut field).is_empty());

        // ...until the soil recovers, which flips the verdict once.
        field
            .send(b"Weather:Clear|Temp:24.5|Hum:60.2|Light level:3.0|Moisture:31")
            .unwrap();
        ctrl.on_radio_ready().await;
        assert_eq!(drain_strings(&mut field), vec!["CMD:FALSE"; 3]);
    }
}
