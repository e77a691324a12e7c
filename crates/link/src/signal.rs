//! Edge-triggered "packet arrived" signal.
//!
//! The receive interrupt must do the absolute minimum: set a flag and
//! return. All draining and decoding happens back in the control loop when
//! it next observes the flag, so the interrupt path can never race an
//! in-progress parse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-slot packet-arrived flag with an async waiter.
///
/// `raise` is safe to call from any thread, including a GPIO interrupt
/// callback; it does no allocation and never blocks. `wait` consumes the
/// edge: it completes once per raise (coalescing raises that land while
/// the consumer is busy, which is fine — the consumer drains every pending
/// frame when it wakes).
pub struct PacketSignal {
    ready: AtomicBool,
    notify: Notify,
}

impl PacketSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Mark a packet ready. Interrupt-context safe: flag set plus waiter
    /// wakeup, nothing else.
    pub fn raise(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Take the flag if it is set. Non-blocking form for poll-style loops.
    pub fn take(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }

    /// Wait until a packet has arrived since the last wait, then clear the
    /// flag.
    pub async fn wait(&self) {
        loop {
            if self.take() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn take_is_edge_triggered() {
        let sig = PacketSignal::new();
        assert!(!sig.take());

        sig.raise();
        assert!(sig.take());
        assert!(!sig.take(), "second take must not see the same edge");
    }

    #[test]
    fn raises_coalesce() {
        let sig = PacketSignal::new();
        sig.raise();
        sig.raise();
        sig.raise();
        assert!(sig.take());
        assert!(!sig.take());
    }

    #[tokio::test]
    async fn wait_completes_after_raise() {
        let sig = PacketSignal::new();
        let waiter = {
            let sig = Arc::clone(&sig);
            tokio::spawn(async move { sig.wait().await })
        };
        // Give the waiter a chance to park first.
        tokio::time::sleep(Duration::from_millis(5)).await;
        sig.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_raised() {
        let sig = PacketSignal::new();
        sig.raise();
        tokio::time::timeout(Duration::from_millis(100), sig.wait())
            .await
            .expect("pre-raised signal should not block");
    }

    #[test]
    fn raise_from_plain_thread() {
        let sig = PacketSignal::new();
        let handle = {
            let sig = Arc::clone(&sig);
            std::thread::spawn(move || sig.raise())
        };
        handle.join().unwrap();
        assert!(sig.take());
    }
}
