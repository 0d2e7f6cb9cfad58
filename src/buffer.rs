//! Local PCM accumulation between capture and the wire.
//!
//! Captured f32 samples are converted to 16-bit PCM on append and drained
//! in chunks sized by the configured send cadence.

use crate::defaults;
use crate::session::SessionState;
use std::time::Duration;

/// Growable buffer of 16-bit PCM samples awaiting transmission.
#[derive(Debug, Default)]
pub struct PcmBuffer {
    samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert f32 samples in [-1.0, 1.0] to i16 and append them.
    /// Out-of-range input is clamped rather than wrapped.
    pub fn append_f32(&mut self, samples: &[f32]) {
        self.samples.reserve(samples.len());
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            self.samples.push((clamped * i16::MAX as f32) as i16);
        }
    }

    /// Remove and return up to `n` samples from the front.
    /// Returns `None` when the buffer is empty.
    pub fn drain_chunk(&mut self, n: usize) -> Option<Vec<i16>> {
        if self.samples.is_empty() {
            return None;
        }
        let take = n.min(self.samples.len());
        Some(self.samples.drain(..take).collect())
    }

    /// Remove and return everything buffered. Returns `None` when empty.
    pub fn drain_all(&mut self) -> Option<Vec<i16>> {
        if self.samples.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.samples))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate.max(1) as f64
    }
}

/// Number of samples that make up one outbound chunk at the given cadence.
pub fn chunk_samples(sample_rate: u32, chunk_interval_ms: u32) -> usize {
    (sample_rate as u64 * chunk_interval_ms as u64 / 1000) as usize
}

/// How long the sender should wait between chunk drains, given the session
/// state. Sleeping sessions batch audio at a reduced cadence; states that do
/// not transmit get `None`.
pub fn pacing_interval(state: SessionState, chunk_interval_ms: u32) -> Option<Duration> {
    match state {
        SessionState::RecordingActive => Some(Duration::from_millis(chunk_interval_ms as u64)),
        SessionState::RecordingSleeping => {
            let ms = (4 * chunk_interval_ms as u64).max(defaults::SLEEP_INTERVAL_FLOOR_MS as u64);
            Some(Duration::from_millis(ms))
        }
        _ => None,
    }
}

/// Serialize i16 samples as little-endian bytes for the wire.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_converts_to_i16() {
        let mut buffer = PcmBuffer::new();
        buffer.append_f32(&[0.0, 0.5, -0.5, 1.0, -1.0]);

        let samples = buffer.drain_all().unwrap();
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], (0.5 * i16::MAX as f32) as i16);
        assert_eq!(samples[2], (-0.5 * i16::MAX as f32) as i16);
        assert_eq!(samples[3], i16::MAX);
        assert_eq!(samples[4], -i16::MAX);
    }

    #[test]
    fn test_append_clamps_out_of_range() {
        let mut buffer = PcmBuffer::new();
        buffer.append_f32(&[2.0, -3.0]);

        let samples = buffer.drain_all().unwrap();
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], -i16::MAX);
    }

    #[test]
    fn test_drain_chunk_takes_at_most_n() {
        let mut buffer = PcmBuffer::new();
        buffer.append_f32(&[0.1; 100]);

        let chunk = buffer.drain_chunk(40).unwrap();
        assert_eq!(chunk.len(), 40);
        assert_eq!(buffer.len(), 60);

        // Partial final chunk
        let chunk = buffer.drain_chunk(80).unwrap();
        assert_eq!(chunk.len(), 60);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_from_empty_buffer_is_none() {
        let mut buffer = PcmBuffer::new();
        assert!(buffer.drain_chunk(100).is_none());
        assert!(buffer.drain_all().is_none());
    }

    #[test]
    fn test_duration_secs() {
        let mut buffer = PcmBuffer::new();
        buffer.append_f32(&[0.0; 16000]);
        assert!((buffer.duration_secs(16000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_samples() {
        // 16 kHz at 250 ms
        assert_eq!(chunk_samples(16000, 250), 4000);
        // 24 kHz at 100 ms
        assert_eq!(chunk_samples(24000, 100), 2400);
    }

    #[test]
    fn test_pacing_interval_active() {
        let interval = pacing_interval(SessionState::RecordingActive, 250);
        assert_eq!(interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_pacing_interval_sleeping_has_floor() {
        // 4 * 250 = 1000, exactly at the floor
        assert_eq!(
            pacing_interval(SessionState::RecordingSleeping, 250),
            Some(Duration::from_millis(1000))
        );
        // 4 * 100 = 400, floor lifts it to 1000
        assert_eq!(
            pacing_interval(SessionState::RecordingSleeping, 100),
            Some(Duration::from_millis(1000))
        );
        // 4 * 500 = 2000, above the floor
        assert_eq!(
            pacing_interval(SessionState::RecordingSleeping, 500),
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn test_pacing_interval_none_outside_recording() {
        assert_eq!(pacing_interval(SessionState::Disconnected, 250), None);
        assert_eq!(pacing_interval(SessionState::Connected, 250), None);
        assert_eq!(pacing_interval(SessionState::Processing, 250), None);
    }

    #[test]
    fn test_to_le_bytes() {
        let bytes = to_le_bytes(&[0x0102, -1]);
        assert_eq!(bytes, vec![0x02, 0x01, 0xff, 0xff]);
    }
}
