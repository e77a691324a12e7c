//! SX1278 LoRa transceiver driver over SPI.
//!
//! Fixed link parameters matched to the field firmware's: 433 MHz, sync
//! word 0xA5, CRC on, SF7, BW 125 kHz, CR 4/5. The DIO0 interrupt does
//! nothing but raise the packet signal; the payload is pulled out of the
//! FIFO later, from the control loop, in `take_frame`.

use std::sync::Arc;
use std::{thread, time::Duration};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::{info, warn};

use crate::error::{RadioError, RadioResult};
use crate::radio::Transceiver;
use crate::signal::PacketSignal;

// ── SX1278 register addresses (LoRa page) ───────────────────────────────────

const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_LNA: u8 = 0x0c;
const REG_FIFO_ADDR_PTR: u8 = 0x0d;
const REG_FIFO_TX_BASE: u8 = 0x0e;
const REG_FIFO_RX_BASE: u8 = 0x0f;
const REG_FIFO_RX_CURRENT: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_MODEM_CONFIG_1: u8 = 0x1d;
const REG_MODEM_CONFIG_2: u8 = 0x1e;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_SYNC_WORD: u8 = 0x39;
const REG_DIO_MAPPING_1: u8 = 0x40;
const REG_VERSION: u8 = 0x42;

// ── Op modes (REG_OP_MODE) ──────────────────────────────────────────────────

/// Bit 7 selects LoRa (vs legacy FSK); must be set while in sleep.
const LONG_RANGE_MODE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;

// ── IRQ flags (REG_IRQ_FLAGS) ───────────────────────────────────────────────

const IRQ_RX_DONE: u8 = 0x40;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
const IRQ_TX_DONE: u8 = 0x08;

// ── Modem configuration ─────────────────────────────────────────────────────

/// BW 125 kHz (0b0111 << 4), CR 4/5 (0b001 << 1), explicit header.
const MODEM_CONFIG_1: u8 = 0x72;
/// SF7 (7 << 4), CRC on (bit 2).
const MODEM_CONFIG_2: u8 = 0x74;
/// AGC auto on.
const MODEM_CONFIG_3: u8 = 0x04;

/// PA_BOOST output at +17 dBm.
const PA_CONFIG: u8 = 0x8f;
/// LNA max gain with boost on HF.
const LNA_BOOST: u8 = 0x23;

/// DIO0 mapped to RxDone. Kept through TX as well — TxDone completion is
/// polled, so DIO0 never fires a phantom packet signal.
const DIO0_RX_DONE: u8 = 0x00;

/// Expected silicon revision in REG_VERSION.
const CHIP_VERSION: u8 = 0x12;

/// Crystal-derived frequency step: Fstep = 32 MHz / 2^19.
const FREQ_STEP_DIVISOR: u64 = 32_000_000;

/// LoRa FIFO is 256 bytes; explicit-header payloads top out at 255.
const MAX_PAYLOAD: usize = 255;

/// TxDone poll cadence and cap. SF7/BW125 airtime for our longest frame is
/// well under this.
const TX_POLL_INTERVAL: Duration = Duration::from_millis(5);
const TX_POLL_ATTEMPTS: u32 = 100;

// ── Wiring ──────────────────────────────────────────────────────────────────

/// Pin and RF wiring for the SX1278 module.
#[derive(Debug, Clone)]
pub struct Sx1278Config {
    pub reset_pin: u8,
    pub dio0_pin: u8,
    pub spi_clock_hz: u32,
    pub frequency_hz: u64,
    pub sync_word: u8,
}

impl Default for Sx1278Config {
    fn default() -> Self {
        Self {
            reset_pin: 25,
            dio0_pin: 24,
            spi_clock_hz: 4_000_000,
            frequency_hz: 433_000_000,
            sync_word: 0xa5,
        }
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// SX1278 driver backed by `rppal::spi`.
pub struct Sx1278 {
    spi: Spi,
    #[allow(dead_code)] // held so the pin stays claimed
    reset: OutputPin,
    /// Held so the DIO0 interrupt registration stays alive.
    #[allow(dead_code)]
    dio0: InputPin,
    signal: Arc<PacketSignal>,
}

impl Sx1278 {
    /// Reset the chip, verify its version register, and program the fixed
    /// link parameters. An unresponsive chip is fatal to the node.
    pub fn new(config: Sx1278Config) -> RadioResult<Self> {
        let gpio = Gpio::new()?;
        let mut reset = gpio.get(config.reset_pin)?.into_output();
        let dio0 = gpio.get(config.dio0_pin)?.into_input_pullup();

        // Hardware reset pulse.
        reset.set_low();
        thread::sleep(Duration::from_millis(1));
        reset.set_high();
        thread::sleep(Duration::from_millis(10));

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, config.spi_clock_hz, Mode::Mode0)?;

        let mut radio = Self {
            spi,
            reset,
            dio0,
            signal: PacketSignal::new(),
        };

        let version = radio.read_reg(REG_VERSION)?;
        if version != CHIP_VERSION {
            return Err(RadioError::InitFailed(format!(
                "unexpected chip version 0x{version:02x} (want 0x{CHIP_VERSION:02x})"
            )));
        }

        // LoRa mode can only be selected from sleep.
        radio.write_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_SLEEP)?;
        thread::sleep(Duration::from_millis(10));

        let frf = (config.frequency_hz << 19) / FREQ_STEP_DIVISOR;
        radio.write_reg(REG_FRF_MSB, (frf >> 16) as u8)?;
        radio.write_reg(REG_FRF_MID, (frf >> 8) as u8)?;
        radio.write_reg(REG_FRF_LSB, frf as u8)?;

        radio.write_reg(REG_FIFO_TX_BASE, 0x00)?;
        radio.write_reg(REG_FIFO_RX_BASE, 0x00)?;
        radio.write_reg(REG_LNA, LNA_BOOST)?;
        radio.write_reg(REG_MODEM_CONFIG_1, MODEM_CONFIG_1)?;
        radio.write_reg(REG_MODEM_CONFIG_2, MODEM_CONFIG_2)?;
        radio.write_reg(REG_MODEM_CONFIG_3, MODEM_CONFIG_3)?;
        radio.write_reg(REG_PREAMBLE_MSB, 0x00)?;
        radio.write_reg(REG_PREAMBLE_LSB, 0x08)?;
        radio.write_reg(REG_SYNC_WORD, config.sync_word)?;
        radio.write_reg(REG_PA_CONFIG, PA_CONFIG)?;
        radio.write_reg(REG_DIO_MAPPING_1, DIO0_RX_DONE)?;
        radio.write_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_STDBY)?;

        // The interrupt only raises the flag; the FIFO is drained from the
        // control loop.
        let signal = Arc::clone(&radio.signal);
        radio
            .dio0
            .set_async_interrupt(Trigger::RisingEdge, move |_: Level| {
                signal.raise();
            })?;

        info!(
            freq_hz = config.frequency_hz,
            sync_word = format_args!("0x{:02x}", config.sync_word),
            "sx1278 initialised"
        );

        Ok(radio)
    }

    // -- register access -----------------------------------------------------

    fn read_reg(&mut self, addr: u8) -> RadioResult<u8> {
        let tx = [addr & 0x7f, 0x00];
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(rx[1])
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> RadioResult<()> {
        let tx = [addr | 0x80, value];
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(())
    }

    fn write_fifo(&mut self, payload: &[u8]) -> RadioResult<()> {
        let mut tx = Vec::with_capacity(payload.len() + 1);
        tx.push(REG_FIFO | 0x80);
        tx.extend_from_slice(payload);
        let mut rx = vec![0u8; tx.len()];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(())
    }

    fn read_fifo(&mut self, len: usize) -> RadioResult<Vec<u8>> {
        let mut tx = vec![0u8; len + 1];
        tx[0] = REG_FIFO & 0x7f;
        let mut rx = vec![0u8; len + 1];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(rx[1..].to_vec())
    }

    fn drain_payload(&mut self) -> RadioResult<Vec<u8>> {
        let len = self.read_reg(REG_RX_NB_BYTES)? as usize;
        let current = self.read_reg(REG_FIFO_RX_CURRENT)?;
        self.write_reg(REG_FIFO_ADDR_PTR, current)?;
        self.read_fifo(len)
    }
}

impl Transceiver for Sx1278 {
    fn listen(&mut self) -> RadioResult<()> {
        self.write_reg(REG_DIO_MAPPING_1, DIO0_RX_DONE)?;
        self.write_reg(REG_FIFO_ADDR_PTR, 0x00)?;
        self.write_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_RX_CONTINUOUS)
    }

    fn standby(&mut self) -> RadioResult<()> {
        self.write_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_STDBY)
    }

    fn send(&mut self, frame: &[u8]) -> RadioResult<()> {
        if frame.len() > MAX_PAYLOAD {
            return Err(RadioError::SendFailed(format!(
                "payload {} exceeds {MAX_PAYLOAD} bytes",
                frame.len()
            )));
        }

        self.write_reg(REG_FIFO_ADDR_PTR, 0x00)?;
        self.write_fifo(frame)?;
        self.write_reg(REG_PAYLOAD_LENGTH, frame.len() as u8)?;
        self.write_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_TX)?;

        // TxDone is polled, not interrupt-mapped, so DIO0 stays dedicated
        // to RxDone. The chip drops back to standby by itself afterwards.
        for _ in 0..TX_POLL_ATTEMPTS {
            thread::sleep(TX_POLL_INTERVAL);
            let flags = self.read_reg(REG_IRQ_FLAGS)?;
            if flags & IRQ_TX_DONE != 0 {
                self.write_reg(REG_IRQ_FLAGS, IRQ_TX_DONE)?;
                return Ok(());
            }
        }

        Err(RadioError::SendFailed("TxDone timeout".to_string()))
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let flags = match self.read_reg(REG_IRQ_FLAGS) {
            Ok(f) => f,
            Err(e) => {
                warn!("irq flag read failed: {e}");
                return None;
            }
        };
        if flags & IRQ_RX_DONE == 0 {
            return None;
        }

        // Acknowledge before reading so a frame arriving mid-drain sets a
        // fresh edge.
        if let Err(e) = self.write_reg(REG_IRQ_FLAGS, IRQ_RX_DONE | IRQ_PAYLOAD_CRC_ERROR) {
            warn!("irq flag clear failed: {e}");
            return None;
        }

        if flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            warn!("dropping frame with failed CRC");
            return None;
        }

        match self.drain_payload() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("fifo drain failed: {e}");
                None
            }
        }
    }

    fn signal(&self) -> Arc<PacketSignal> {
        Arc::clone(&self.signal)
    }
}
