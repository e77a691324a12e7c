//! Radio link error types

use thiserror::Error;

use crate::radio::LinkMode;

/// Result type for radio operations
pub type RadioResult<T> = Result<T, RadioError>;

/// Errors that can occur on the radio link
#[derive(Debug, Error)]
pub enum RadioError {
    /// Transceiver did not respond at boot. Fatal: the node cannot run
    /// without its radio and there is no auto-recovery.
    #[error("transceiver init failed: {0}")]
    InitFailed(String),

    /// A transmit was attempted while the link was not in transmit mode.
    #[error("operation requires transmit mode, link is {0:?}")]
    WrongMode(LinkMode),

    /// The transceiver failed to push a frame onto the air. Best-effort:
    /// callers log and re-arm receiving.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// SPI bus error (hardware driver only).
    #[cfg(feature = "hw")]
    #[error("spi: {0}")]
    Spi(#[from] rppal::spi::Error),

    /// GPIO error (hardware driver only).
    #[cfg(feature = "hw")]
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}
