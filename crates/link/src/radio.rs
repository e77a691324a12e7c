//! Half-duplex radio state machine.
//!
//! The physical radio can either listen or send at any instant, never
//! both. `RadioLink` serializes that choice: it owns the current mode and
//! is the only thing allowed to flip it. Every transmit path ends with the
//! caller re-arming receive, because time spent off the listen path is
//! time the node cannot hear a command.
//!
//! ```text
//! Receiving ──begin_transmit()──▶ Transmitting
//!     ▲                               │
//!     └────────start_receiving()──────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{RadioError, RadioResult};
use crate::signal::PacketSignal;

/// Mode-switch settle time. Empirical: the transceiver needs a beat after
/// an opmode change before it behaves.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Per-byte airtime allowance at SF7/BW125, plus a fixed guard. Transmit
/// holds the link for `len × 1 ms + 50 ms` and no longer, which bounds how
/// long the node can be starved away from listening.
pub const TX_MS_PER_BYTE: u64 = 1;
pub const TX_GUARD_MS: u64 = 50;

/// Which half of the duplex the link currently occupies. Exactly one value
/// at any instant; mutated only by `RadioLink`'s own transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Receiving,
    Transmitting,
}

// ---------------------------------------------------------------------------
// Transceiver seam
// ---------------------------------------------------------------------------

/// Driver surface for a physical (or simulated) half-duplex transceiver.
///
/// Implementations are plain blocking drivers; timing policy lives in
/// `RadioLink`. The receive interrupt must only raise the packet signal —
/// frames are drained later via `take_frame`.
pub trait Transceiver {
    /// Enter continuous receive mode.
    fn listen(&mut self) -> RadioResult<()>;

    /// Leave receive mode and idle, ready to send.
    fn standby(&mut self) -> RadioResult<()>;

    /// Push one frame onto the air. Requires standby.
    fn send(&mut self, frame: &[u8]) -> RadioResult<()>;

    /// Drain one pending received frame, if any.
    fn take_frame(&mut self) -> Option<Vec<u8>>;

    /// The signal raised when a frame arrives.
    fn signal(&self) -> Arc<PacketSignal>;
}

// ---------------------------------------------------------------------------
// Link state machine
// ---------------------------------------------------------------------------

/// Half-duplex state machine wrapping a [`Transceiver`].
///
/// Starts out Receiving and runs for the life of the process. Not
/// internally synchronized: the owning control loop is the single caller,
/// which is what makes the mode invariant hold.
pub struct RadioLink<T: Transceiver> {
    transceiver: T,
    mode: LinkMode,
}

impl<T: Transceiver> RadioLink<T> {
    /// Wrap a transceiver and arm receive. The transceiver must already be
    /// initialized; init failure is the caller's fatal-at-boot path.
    pub fn new(mut transceiver: T) -> RadioResult<Self> {
        transceiver.listen()?;
        Ok(Self {
            transceiver,
            mode: LinkMode::Receiving,
        })
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn signal(&self) -> Arc<PacketSignal> {
        self.transceiver.signal()
    }

    /// Re-arm receive. No-op when already Receiving — no second settle
    /// delay is incurred.
    pub async fn start_receiving(&mut self) -> RadioResult<()> {
        if self.mode == LinkMode::Receiving {
            return Ok(());
        }
        self.transceiver.listen()?;
        self.mode = LinkMode::Receiving;
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Stop listening and get ready to send. No-op when already
    /// Transmitting.
    pub async fn begin_transmit(&mut self) -> RadioResult<()> {
        if self.mode == LinkMode::Transmitting {
            return Ok(());
        }
        self.transceiver.standby()?;
        self.mode = LinkMode::Transmitting;
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Send one frame. Requires `begin_transmit` first. Holds for the
    /// airtime bound whether or not the send succeeded, then returns the
    /// send outcome — the caller logs failures and re-arms receive either
    /// way.
    pub async fn transmit(&mut self, frame: &[u8]) -> RadioResult<()> {
        if self.mode != LinkMode::Transmitting {
            return Err(RadioError::WrongMode(self.mode));
        }

        let outcome = self.transceiver.send(frame);
        if let Err(ref e) = outcome {
            warn!(len = frame.len(), "send failed: {e}");
        }

        let airtime = Duration::from_millis(frame.len() as u64 * TX_MS_PER_BYTE + TX_GUARD_MS);
        tokio::time::sleep(airtime).await;

        outcome
    }

    /// Drain one pending frame. Meaningful while Receiving; draining is
    /// the consumer's job after the packet signal fires.
    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        self.transceiver.take_frame()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTransceiver;

    async fn test_link() -> RadioLink<SimTransceiver> {
        RadioLink::new(SimTransceiver::new()).unwrap()
    }

    // -- mode exclusivity ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn starts_receiving() {
        let link = test_link().await;
        assert_eq!(link.mode(), LinkMode::Receiving);
    }

    #[tokio::test(start_paused = true)]
    async fn start_receiving_when_receiving_is_noop() {
        let mut link = test_link().await;
        let before = tokio::time::Instant::now();
        link.start_receiving().await.unwrap();
        // No settle delay incurred for the no-op.
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(link.mode(), LinkMode::Receiving);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_transmit_switches_mode_with_settle() {
        let mut link = test_link().await;
        let before = tokio::time::Instant::now();
        link.begin_transmit().await.unwrap();
        assert_eq!(link.mode(), LinkMode::Transmitting);
        assert_eq!(before.elapsed(), SETTLE_DELAY);

        // Second call is a no-op, no extra settle.
        link.begin_transmit().await.unwrap();
        assert_eq!(before.elapsed(), SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_alternate() {
        let mut link = test_link().await;
        link.begin_transmit().await.unwrap();
        assert_eq!(link.mode(), LinkMode::Transmitting);
        link.start_receiving().await.unwrap();
        assert_eq!(link.mode(), LinkMode::Receiving);
        link.begin_transmit().await.unwrap();
        assert_eq!(link.mode(), LinkMode::Transmitting);
    }

    // -- transmit ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn transmit_requires_transmit_mode() {
        let mut link = test_link().await;
        let err = link.transmit(b"CMD:TRUE").await.unwrap_err();
        assert!(matches!(err, RadioError::WrongMode(LinkMode::Receiving)));
    }

    #[tokio::test(start_paused = true)]
    async fn transmit_holds_for_airtime_bound() {
        let mut link = test_link().await;
        link.begin_transmit().await.unwrap();

        let frame = b"CMD:TRUE";
        let before = tokio::time::Instant::now();
        link.transmit(frame).await.unwrap();

        let expected =
            Duration::from_millis(frame.len() as u64 * TX_MS_PER_BYTE + TX_GUARD_MS);
        assert_eq!(before.elapsed(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_between_paired_links() {
        let (a, b) = SimTransceiver::pair();
        let mut tx = RadioLink::new(a).unwrap();
        let mut rx = RadioLink::new(b).unwrap();

        tx.begin_transmit().await.unwrap();
        tx.transmit(b"CMD:TRUE").await.unwrap();
        tx.start_receiving().await.unwrap();

        assert!(rx.signal().take());
        assert_eq!(rx.take_frame().as_deref(), Some(&b"CMD:TRUE"[..]));
        assert!(rx.take_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_lost_while_peer_transmitting() {
        let (a, b) = SimTransceiver::pair();
        let mut tx = RadioLink::new(a).unwrap();
        let mut rx = RadioLink::new(b).unwrap();

        // Peer off the listen path: half-duplex means the frame is gone.
        rx.begin_transmit().await.unwrap();

        tx.begin_transmit().await.unwrap();
        tx.transmit(b"CMD:TRUE").await.unwrap();

        rx.start_receiving().await.unwrap();
        assert!(!rx.signal().take());
        assert!(rx.take_frame().is_none());
    }
}
