//! DiscoveryBeacon: periodic announcements on the discovery groups.
//!
//! Each round sends the configured payload, then drains answers until a
//! receive times out, then idles for the rest of the interval.  The loop
//! checks a shared `running` flag between every step, so clearing the flag
//! stops it within one receive timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use airlink_core::{NetIo, TransportError};
use tracing::{debug, info, warn};

use crate::infrastructure::storage::config::DiscoverySection;

/// Longest single sleep while idling, so a stop request is seen promptly.
const IDLE_SLICE: Duration = Duration::from_millis(50);

/// Counters accumulated over a beacon run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BeaconStats {
    pub rounds: u32,
    pub sent: u32,
    pub send_failures: u32,
    pub responses: u32,
    pub bytes_received: usize,
}

/// Announces the node until told to stop.
#[derive(Debug, Clone)]
pub struct DiscoveryBeacon {
    payload: Vec<u8>,
    recv_timeout: Duration,
    interval: Duration,
}

impl DiscoveryBeacon {
    pub fn new(payload: impl Into<Vec<u8>>, recv_timeout: Duration, interval: Duration) -> Self {
        Self {
            payload: payload.into(),
            recv_timeout,
            interval,
        }
    }

    pub fn from_config(config: &DiscoverySection) -> Self {
        Self::new(
            config.payload.as_bytes(),
            config.recv_timeout(),
            config.beacon_interval(),
        )
    }

    /// Runs rounds while `running` is set, at most `max_rounds` of them.
    ///
    /// Failed sends and read errors are counted and logged; the loop keeps
    /// going.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotOpen`] if the transport has no socket, since no
    /// later round could succeed either.
    pub fn run(
        &self,
        io: &mut dyn NetIo,
        running: &AtomicBool,
        max_rounds: Option<u32>,
    ) -> Result<BeaconStats, TransportError> {
        let mut stats = BeaconStats::default();
        info!(
            "beacon: {} byte payload every {:?}",
            self.payload.len(),
            self.interval
        );

        while running.load(Ordering::Relaxed) && max_rounds.map_or(true, |max| stats.rounds < max)
        {
            let started = Instant::now();
            stats.rounds += 1;
            self.announce(io, &mut stats)?;
            self.drain(io, running, &mut stats)?;

            let last = max_rounds.is_some_and(|max| stats.rounds >= max);
            if !last {
                self.idle(running, self.interval.saturating_sub(started.elapsed()));
            }
        }

        info!(
            "beacon stopped after {} rounds: {} sent, {} responses",
            stats.rounds, stats.sent, stats.responses
        );
        Ok(stats)
    }

    fn announce(&self, io: &mut dyn NetIo, stats: &mut BeaconStats) -> Result<(), TransportError> {
        let tx = io.tx();
        tx.reset();
        let queued = tx.fill_from(&self.payload);
        if queued < self.payload.len() {
            warn!(
                "beacon: payload truncated to {queued} of {} bytes",
                self.payload.len()
            );
        }

        match io.send() {
            Ok(()) => {
                stats.sent += 1;
                debug!("beacon: announced ({queued} bytes)");
                Ok(())
            }
            Err(TransportError::NotOpen) => Err(TransportError::NotOpen),
            Err(e) => {
                stats.send_failures += 1;
                warn!("beacon: send failed: {e}");
                Ok(())
            }
        }
    }

    /// Reads answers until the transport goes quiet for one receive timeout.
    fn drain(
        &self,
        io: &mut dyn NetIo,
        running: &AtomicBool,
        stats: &mut BeaconStats,
    ) -> Result<(), TransportError> {
        while running.load(Ordering::Relaxed) {
            io.rx().reset();
            let room = io.rx().space();
            match io.recv(room, self.recv_timeout) {
                Ok(n) => {
                    stats.responses += 1;
                    stats.bytes_received += n;
                    info!("beacon: {n} byte answer");
                }
                Err(TransportError::Timeout) => return Ok(()),
                Err(TransportError::NotOpen) => return Err(TransportError::NotOpen),
                Err(e) => {
                    warn!("beacon: receive failed: {e}");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn idle(&self, running: &AtomicBool, mut remaining: Duration) {
        while !remaining.is_zero() && running.load(Ordering::Relaxed) {
            let slice = remaining.min(IDLE_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use airlink_core::{Direction, IoBuffer, StackError};

    /// Scripted transport: records every send and replays queued receives.
    struct ScriptedIo {
        rx: IoBuffer,
        tx: IoBuffer,
        sent: Vec<Vec<u8>>,
        send_results: VecDeque<Result<(), TransportError>>,
        replies: VecDeque<Result<Vec<u8>, TransportError>>,
    }

    impl ScriptedIo {
        fn new() -> Self {
            Self {
                rx: IoBuffer::new(64, Direction::Rx),
                tx: IoBuffer::new(16, Direction::Tx),
                sent: Vec::new(),
                send_results: VecDeque::new(),
                replies: VecDeque::new(),
            }
        }
    }

    impl NetIo for ScriptedIo {
        fn recv(&mut self, max_len: usize, _timeout: Duration) -> Result<usize, TransportError> {
            match self.replies.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(max_len);
                    Ok(self.rx.fill_from(&bytes[..n]))
                }
                Some(Err(e)) => Err(e),
                None => Err(TransportError::Timeout),
            }
        }

        fn send(&mut self) -> Result<(), TransportError> {
            self.sent.push(self.tx.readable().to_vec());
            self.tx.reset();
            self.send_results.pop_front().unwrap_or(Ok(()))
        }

        fn rx(&mut self) -> &mut IoBuffer {
            &mut self.rx
        }

        fn tx(&mut self) -> &mut IoBuffer {
            &mut self.tx
        }
    }

    fn beacon(payload: &str) -> DiscoveryBeacon {
        DiscoveryBeacon::new(payload, Duration::from_millis(1), Duration::ZERO)
    }

    #[test]
    fn test_each_round_sends_payload_and_counts_answers() {
        // Arrange
        let mut io = ScriptedIo::new();
        io.replies.push_back(Ok(b"here".to_vec()));
        io.replies.push_back(Ok(b"me too".to_vec()));
        let running = AtomicBool::new(true);

        // Act
        let stats = beacon("hello").run(&mut io, &running, Some(2)).unwrap();

        // Assert: both answers land in round one, round two times out
        assert_eq!(io.sent, [b"hello".to_vec(), b"hello".to_vec()]);
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.responses, 2);
        assert_eq!(stats.bytes_received, 10);
    }

    #[test]
    fn test_cleared_flag_runs_no_rounds() {
        let mut io = ScriptedIo::new();
        let running = AtomicBool::new(false);

        let stats = beacon("hello").run(&mut io, &running, None).unwrap();

        assert_eq!(stats, BeaconStats::default());
        assert!(io.sent.is_empty());
    }

    #[test]
    fn test_failed_send_is_counted_and_loop_continues() {
        // Arrange
        let mut io = ScriptedIo::new();
        io.send_results
            .push_back(Err(TransportError::FanOutFailed { attempted: 3 }));
        let running = AtomicBool::new(true);

        // Act
        let stats = beacon("x").run(&mut io, &running, Some(2)).unwrap();

        // Assert
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.sent, 1);
    }

    #[test]
    fn test_read_error_ends_drain_but_not_run() {
        let mut io = ScriptedIo::new();
        io.replies
            .push_back(Err(TransportError::Read(StackError::Code(-3))));
        io.replies.push_back(Ok(b"late".to_vec()));
        let running = AtomicBool::new(true);

        let stats = beacon("x").run(&mut io, &running, Some(2)).unwrap();

        // The answer queued after the error is read in round two.
        assert_eq!(stats.responses, 1);
    }

    #[test]
    fn test_closed_transport_stops_run() {
        let mut io = ScriptedIo::new();
        io.send_results.push_back(Err(TransportError::NotOpen));
        let running = AtomicBool::new(true);

        let result = beacon("x").run(&mut io, &running, None);

        assert_eq!(result, Err(TransportError::NotOpen));
    }

    #[test]
    fn test_oversized_payload_is_truncated_to_tx_capacity() {
        let mut io = ScriptedIo::new();
        let running = AtomicBool::new(true);

        beacon("0123456789abcdefXYZ").run(&mut io, &running, Some(1)).unwrap();

        assert_eq!(io.sent, [b"0123456789abcdef".to_vec()]);
    }

    #[test]
    fn test_from_config_uses_discovery_section() {
        let section = DiscoverySection::default();
        let beacon = DiscoveryBeacon::from_config(&section);
        assert_eq!(beacon.payload, section.payload.as_bytes());
        assert_eq!(beacon.interval, section.beacon_interval());
        assert_eq!(beacon.recv_timeout, section.recv_timeout());
    }
}
