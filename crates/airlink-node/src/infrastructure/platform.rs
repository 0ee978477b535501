//! Host implementation of the `Platform` trait.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use airlink_core::Platform;
use rand::RngCore;
use tracing::trace;

/// Thread sleep, thread-local RNG and a clock anchored at construction.
#[derive(Debug)]
pub struct HostPlatform {
    origin: Instant,
    /// Timing jitter fed in through `feed_entropy`, folded into the next
    /// random output.
    jitter: AtomicU8,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            jitter: AtomicU8::new(0),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
        if let Some(first) = buf.first_mut() {
            *first ^= self.jitter.swap(0, Ordering::Relaxed);
        }
    }

    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn feed_entropy(&self, bits: u8) {
        trace!("entropy += {bits:#04x}");
        self.jitter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pool| {
                Some(pool.rotate_left(3) ^ bits)
            })
            .ok();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
