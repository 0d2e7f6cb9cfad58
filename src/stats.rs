//! Counters for the streaming session, shared across the capture thread,
//! the pacing task and the protocol driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free session telemetry. Cloned snapshots are handed out on demand,
/// the counters themselves live behind an `Arc`.
#[derive(Debug, Default)]
pub struct Telemetry {
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    responses: AtomicU64,
    latency_ms_sum: AtomicU64,
}

/// Point-in-time view of the session counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub responses: u64,
    /// Mean commit-to-response latency in milliseconds, 0 if no responses yet.
    pub avg_latency_ms: u64,
    /// Audio currently buffered locally, in seconds.
    pub buffered_secs: f64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound audio chunk of `bytes` encoded PCM bytes.
    pub fn record_chunk(&self, bytes: u64) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one completed commit-to-response round trip.
    pub fn record_latency(&self, latency: Duration) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_sum
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, buffered_samples: usize, sample_rate: u32) -> StatsSnapshot {
        let responses = self.responses.load(Ordering::Relaxed);
        let latency_sum = self.latency_ms_sum.load(Ordering::Relaxed);
        let avg_latency_ms = if responses > 0 {
            latency_sum / responses
        } else {
            0
        };

        StatsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            responses,
            avg_latency_ms,
            buffered_secs: buffered_samples as f64 / sample_rate.max(1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_telemetry_is_zeroed() {
        let telemetry = Telemetry::new();
        let snapshot = telemetry.snapshot(0, 16000);

        assert_eq!(snapshot.chunks_sent, 0);
        assert_eq!(snapshot.bytes_sent, 0);
        assert_eq!(snapshot.responses, 0);
        assert_eq!(snapshot.avg_latency_ms, 0);
        assert_eq!(snapshot.buffered_secs, 0.0);
    }

    #[test]
    fn test_record_chunk_accumulates() {
        let telemetry = Telemetry::new();
        telemetry.record_chunk(8000);
        telemetry.record_chunk(8000);
        telemetry.record_chunk(2000);

        let snapshot = telemetry.snapshot(0, 16000);
        assert_eq!(snapshot.chunks_sent, 3);
        assert_eq!(snapshot.bytes_sent, 18000);
    }

    #[test]
    fn test_avg_latency_is_mean_of_recorded_round_trips() {
        let telemetry = Telemetry::new();
        telemetry.record_latency(Duration::from_millis(100));
        telemetry.record_latency(Duration::from_millis(300));

        let snapshot = telemetry.snapshot(0, 16000);
        assert_eq!(snapshot.responses, 2);
        assert_eq!(snapshot.avg_latency_ms, 200);
    }

    #[test]
    fn test_buffered_secs_from_sample_count() {
        let telemetry = Telemetry::new();
        // 8000 samples at 16 kHz is half a second
        let snapshot = telemetry.snapshot(8000, 16000);
        assert!((snapshot.buffered_secs - 0.5).abs() < 1e-9);
    }
}
