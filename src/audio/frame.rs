//! Per-frame sample math shared by the detector and the level meter.

/// Root-mean-square energy of a frame of f32 samples in [-1.0, 1.0].
/// Returns 0.0 for an empty frame.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Split a frame into `buckets` equal segments and compute the mean
/// absolute amplitude of each, scaled into `0..=scale`. Feeds the level
/// visualization only; protocol behavior never depends on it.
pub fn level_buckets(samples: &[f32], buckets: usize, scale: f32) -> Vec<f32> {
    if samples.is_empty() || buckets == 0 {
        return vec![0.0; buckets];
    }
    let segment_len = samples.len().div_ceil(buckets);
    let mut out = Vec::with_capacity(buckets);
    for segment in samples.chunks(segment_len) {
        let mean_abs = segment.iter().map(|s| s.abs()).sum::<f32>() / segment.len() as f32;
        out.push((mean_abs * scale).min(scale));
    }
    // A short frame fills fewer segments than the display expects
    out.resize(buckets, 0.0);
    out
}
