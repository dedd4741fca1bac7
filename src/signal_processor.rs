use thiserror::Error;

use crate::config::AcquisitionConfig;
use crate::frame::{LengthMismatch, RawFrame};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessError {
    #[error("no raw frames to process")]
    NoFrames,

    #[error(transparent)]
    Length(#[from] LengthMismatch),
}

/// Signal conditioning chain: average → boxcar smooth.
///
/// Normalization is deliberately not part of `process`; the published
/// intensities stay in counts and [`normalize`] is applied on the render
/// path only.
#[derive(Clone, Debug)]
pub struct SignalProcessor {
    averages: usize,
    half_width: usize,
}

impl SignalProcessor {
    pub fn new(averages: usize, half_width: usize) -> Self {
        Self {
            averages: averages.max(1),
            half_width,
        }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.averages as usize, config.smoothing_half_width)
    }

    /// Raw reads per published frame
    pub fn averages(&self) -> usize {
        self.averages
    }

    /// Process one tick's worth of raw frames into published intensities
    pub fn process(&self, raw_frames: &[RawFrame]) -> Result<Vec<f64>, ProcessError> {
        // Step 1: elementwise mean across the tick's reads
        let averaged = average(raw_frames)?;

        // Step 2: zero-padded centered moving average
        Ok(boxcar(&averaged, self.half_width))
    }
}

/// Elementwise mean of equally long frames.
///
/// Summation runs in frame order; the result is independent of that order
/// up to floating-point rounding.
pub fn average(frames: &[RawFrame]) -> Result<Vec<f64>, ProcessError> {
    let first = frames.first().ok_or(ProcessError::NoFrames)?;
    if frames.len() == 1 {
        return Ok(first.clone());
    }

    let n = first.len();
    let mut sum = vec![0.0; n];
    for frame in frames {
        if frame.len() != n {
            return Err(LengthMismatch {
                expected: n,
                actual: frame.len(),
            }
            .into());
        }
        for (acc, &v) in sum.iter_mut().zip(frame.iter()) {
            *acc += v;
        }
    }

    let count = frames.len() as f64;
    Ok(sum.into_iter().map(|v| v / count).collect())
}

/// Centered moving average with window `2 * half_width + 1`, same length as
/// the input. Samples past either end count as zero, so the first and last
/// `half_width` outputs are attenuated (a linear convolution with a
/// normalized box kernel, "same" mode).
pub fn boxcar(input: &[f64], half_width: usize) -> Vec<f64> {
    if half_width == 0 || input.is_empty() {
        return input.to_vec();
    }

    let n = input.len();
    let window = (2 * half_width + 1) as f64;

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half_width);
            let hi = (i + half_width).min(n - 1);
            input[lo..=hi].iter().sum::<f64>() / window
        })
        .collect()
}

/// Scale so the largest value is 1.0. A zero maximum passes through unchanged.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == 0.0 || !max.is_finite() {
        return values.to_vec();
    }
    values.iter().map(|v| v / max).collect()
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!((x - y).abs() < EPS, "index {i}: {x} vs {y}");
        }
    }

    #[test]
    fn test_identity_law() {
        let frame = vec![3.0, 0.0, 17.5, 4095.0, 12.0];
        let processor = SignalProcessor::new(1, 0);

        let out = processor.process(&[frame.clone()]).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_average_is_order_independent() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![10.0, 0.5, 7.0, 1.0];
        let c = vec![0.1, 100.0, 3.3, 8.0];

        let forward = average(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let shuffled = average(&[c, a, b]).unwrap();

        assert_close(&forward, &shuffled);
        assert!((forward[0] - 11.1 / 3.0).abs() < EPS);
    }

    #[test]
    fn test_average_rejects_ragged_frames() {
        let err = average(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert_eq!(err, ProcessError::Length(LengthMismatch { expected: 2, actual: 1 }));
        assert_eq!(average(&[]), Err(ProcessError::NoFrames));
    }

    #[test]
    fn test_boxcar_preserves_length() {
        let input: Vec<f64> = (0..37).map(|i| i as f64).collect();
        for h in 0..5 {
            assert_eq!(boxcar(&input, h).len(), input.len());
        }
        // Window wider than the signal still keeps the length
        assert_eq!(boxcar(&[1.0, 2.0], 10).len(), 2);
    }

    #[test]
    fn test_boxcar_constant_with_attenuated_edges() {
        let v = 12.0;
        let input = vec![v; 10];
        let out = boxcar(&input, 2);

        // Interior untouched
        for &x in &out[2..8] {
            assert!((x - v).abs() < EPS);
        }

        // Zero padding dims the edges, progressively
        assert!((out[0] - v * 3.0 / 5.0).abs() < EPS);
        assert!((out[1] - v * 4.0 / 5.0).abs() < EPS);
        assert!(out[0] < v && out[1] < v);
        assert!(out[9] < v && out[8] < v);
    }

    #[test]
    fn test_boxcar_matches_convolution() {
        let out = boxcar(&[3.0, 6.0, 9.0, 0.0], 1);
        assert_close(&out, &[3.0, 6.0, 5.0, 3.0]);
    }

    #[test]
    fn test_normalize() {
        assert_close(&normalize(&[1.0, 2.0, 4.0]), &[0.25, 0.5, 1.0]);

        // All-zero frame passes through
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_process_averages_then_smooths() {
        let processor = SignalProcessor::new(2, 1);
        let out = processor
            .process(&[vec![0.0, 3.0, 0.0], vec![0.0, 3.0, 0.0]])
            .unwrap();
        assert_close(&out, &[1.0, 1.0, 1.0]);
    }
}
