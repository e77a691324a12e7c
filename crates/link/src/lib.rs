//! Shared radio link for the valve node and its gateway: the textual wire
//! codec, the half-duplex state machine, and the transceiver drivers.
//!
//! Both ends of the link depend on this crate; everything node-specific
//! (sensors, actuator, MQTT bridging, the irrigation decision) lives in
//! the binaries.

pub mod error;
pub mod packet;
pub mod radio;
pub mod signal;
pub mod sim;
#[cfg(feature = "hw")]
pub mod sx1278;

pub use error::{RadioError, RadioResult};
pub use packet::{
    decode_command, decode_telemetry, encode_command, encode_telemetry, TelemetrySnapshot,
    ValveCommand, ValveState, Weather,
};
pub use radio::{LinkMode, RadioLink, Transceiver};
pub use signal::PacketSignal;
pub use sim::SimTransceiver;
