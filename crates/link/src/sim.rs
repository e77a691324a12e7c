//! In-memory transceiver for development and tests.
//!
//! `pair()` links two endpoints back-to-back: a frame sent on one lands in
//! the other's inbox and raises its packet signal, but only while the peer
//! is actually listening — a frame aired at a transmitting or idle peer is
//! simply gone, the same way the real half-duplex channel loses it. Loss
//! and send-failure injection cover the remaining unhappy paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::{RadioError, RadioResult};
use crate::radio::Transceiver;
use crate::signal::PacketSignal;

/// One receive endpoint's shared half: inbox, arrival signal, and whether
/// it is currently on the listen path.
struct Endpoint {
    inbox: Mutex<VecDeque<Vec<u8>>>,
    signal: Arc<PacketSignal>,
    listening: AtomicBool,
}

impl Endpoint {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(VecDeque::new()),
            signal: PacketSignal::new(),
            listening: AtomicBool::new(false),
        })
    }

    /// Deliver a frame as the receive interrupt would: enqueue, raise the
    /// signal, nothing more.
    fn deliver(&self, frame: &[u8]) {
        self.inbox
            .lock()
            .expect("sim inbox poisoned")
            .push_back(frame.to_vec());
        self.signal.raise();
    }
}

/// Simulated transceiver endpoint.
pub struct SimTransceiver {
    local: Arc<Endpoint>,
    peer: Option<Arc<Endpoint>>,
    /// Drop the next N sends on the air (delivery loss, sender unaware).
    drop_next: AtomicU32,
    /// Make sends report failure (driver-level fault, sender aware).
    fail_sends: AtomicBool,
}

impl SimTransceiver {
    /// An unpaired endpoint: sends disappear into the air. Enough for
    /// running a single node binary without its counterpart.
    pub fn new() -> Self {
        Self {
            local: Endpoint::new(),
            peer: None,
            drop_next: AtomicU32::new(0),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Two endpoints sharing one channel.
    pub fn pair() -> (Self, Self) {
        let a = Endpoint::new();
        let b = Endpoint::new();
        (
            Self {
                local: Arc::clone(&a),
                peer: Some(Arc::clone(&b)),
                drop_next: AtomicU32::new(0),
                fail_sends: AtomicBool::new(false),
            },
            Self {
                local: b,
                peer: Some(a),
                drop_next: AtomicU32::new(0),
                fail_sends: AtomicBool::new(false),
            },
        )
    }

    /// Drop the next `n` outbound frames after they leave this endpoint.
    /// The sender still sees success — that is what lossy means.
    pub fn set_drop_next(&self, n: u32) {
        self.drop_next.store(n, Ordering::Relaxed);
    }

    /// Force subsequent sends to report a driver failure.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Place a frame straight into this endpoint's inbox, as if it had
    /// arrived over the air. Test helper.
    pub fn inject(&self, frame: &[u8]) {
        self.local.deliver(frame);
    }
}

impl Default for SimTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Transceiver for SimTransceiver {
    fn listen(&mut self) -> RadioResult<()> {
        self.local.listening.store(true, Ordering::Release);
        Ok(())
    }

    fn standby(&mut self) -> RadioResult<()> {
        self.local.listening.store(false, Ordering::Release);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> RadioResult<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(RadioError::SendFailed("simulated driver fault".into()));
        }

        if self
            .drop_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            trace!(len = frame.len(), "frame dropped on air");
            return Ok(());
        }

        if let Some(peer) = &self.peer {
            if peer.listening.load(Ordering::Acquire) {
                peer.deliver(frame);
            } else {
                trace!(len = frame.len(), "peer not listening, frame lost");
            }
        }
        Ok(())
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        self.local
            .inbox
            .lock()
            .expect("sim inbox poisoned")
            .pop_front()
    }

    fn signal(&self) -> Arc<PacketSignal> {
        Arc::clone(&self.local.signal)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
