mod config;
mod controller;
mod mqtt;
mod policy;

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::info;
use tracing_subscriber::EnvFilter;

use loravalve_link::{RadioLink, RadioResult};

use config::GatewayConfig;
use controller::GatewayController;
use mqtt::{TOPIC_CMD_SET, TOPIC_MODE_SET, TOPIC_THRESHOLD_SET};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = GatewayConfig::from_env();

    // ── Radio ───────────────────────────────────────────────────────
    // A dead transceiver at boot is fatal; the gateway exits and the
    // supervisor (or operator) restarts it.
    let link = build_transceiver()
        .and_then(RadioLink::new)
        .context("radio init")?;

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("loravalve-gateway", cfg.mqtt_host.clone(), cfg.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);

    client.subscribe(TOPIC_CMD_SET, QoS::AtLeastOnce).await?;
    client.subscribe(TOPIC_THRESHOLD_SET, QoS::AtLeastOnce).await?;
    client.subscribe(TOPIC_MODE_SET, QoS::AtLeastOnce).await?;

    info!(
        host = %cfg.mqtt_host,
        port = cfg.mqtt_port,
        soil_threshold = cfg.soil_threshold_pct,
        sunlight_ceiling = cfg.sunlight_ceiling,
        "gateway ready — subscribed to control channels"
    );

    GatewayController::new(link, client, cfg.thresholds())
        .run(eventloop)
        .await
}

#[cfg(feature = "hw")]
fn build_transceiver() -> RadioResult<loravalve_link::sx1278::Sx1278> {
    loravalve_link::sx1278::Sx1278::new(loravalve_link::sx1278::Sx1278Config::default())
}

#[cfg(not(feature = "hw"))]
fn build_transceiver() -> RadioResult<loravalve_link::SimTransceiver> {
    Ok(loravalve_link::SimTransceiver::new())
}
