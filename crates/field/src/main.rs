mod controller;
mod sensors;
mod servo;
mod sim;

use std::{env, time::Duration};

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loravalve_link::{RadioError, RadioLink, RadioResult};

use controller::FieldController;
use servo::ValveServo;
use sim::{GardenSim, Scenario};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let period_s: u64 = env::var("TELEMETRY_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    // ── Radio ───────────────────────────────────────────────────────
    // A dead transceiver is the one unrecoverable fault: park in a
    // diagnostic halt until someone power-cycles the node.
    let link = match build_transceiver().and_then(RadioLink::new) {
        Ok(link) => link,
        Err(e) => halt(e).await,
    };

    // ── Sensors & actuator ──────────────────────────────────────────
    let sensors = GardenSim::new(scenario);
    info!(%scenario, "sensor suite: simulated garden");

    let servo = ValveServo::new()?;

    FieldController::new(link, sensors, servo, Duration::from_secs(period_s))
        .run()
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

/// Diagnostic halt: announce the failure forever, never return. The
/// firmware equivalent blinks the status LED; here the log line is the
/// blink.
async fn halt(err: RadioError) -> ! {
    error!("radio init failed: {err}");
    loop {
        error!("node halted — power cycle required");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
