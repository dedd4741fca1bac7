use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::color::{Color32, ColorTable};
use crate::frame::ProcessedFrame;
use crate::signal_processor::normalize;

/// Per-channel strip colors: base color scaled by the frame-normalized
/// intensity, clamped to [0, 1], then truncated to 8 bits.
pub fn strip_colors(intensities: &[f64], table: &ColorTable) -> Vec<Color32> {
    let norm = normalize(intensities);
    table
        .as_slice()
        .iter()
        .zip(norm.iter())
        .map(|(base, &n)| {
            let n = n as f32;
            Color32::from_unit([base[0] * n, base[1] * n, base[2] * n])
        })
        .collect()
}

/// Resample a row of channel colors to `width` columns, nearest channel
pub fn resample_nearest(row: &[Color32], width: usize) -> Vec<Color32> {
    if row.is_empty() {
        return vec![Color32::BLACK; width];
    }
    let n = row.len();
    (0..width)
        .map(|x| row[(x * n / width.max(1)).min(n - 1)])
        .collect()
}

/// Row-major RGB image of the detector strip
#[derive(Clone, Debug, PartialEq)]
pub struct StripImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Color32>,
}

impl StripImage {
    /// Stack `height` copies of one row (duplicated, not interpolated)
    pub fn from_row(row: &[Color32], height: usize) -> Self {
        let mut pixels = Vec::with_capacity(row.len() * height);
        for _ in 0..height {
            pixels.extend_from_slice(row);
        }
        Self {
            width: row.len(),
            height,
            pixels,
        }
    }

    /// Packed RGB8 bytes
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|c| c.to_array()).collect()
    }
}

/// What the GUI draws for one frame
#[derive(Clone, Debug)]
pub struct RenderModel {
    pub sequence: u64,
    /// [wavelength, intensity] pairs for the line series
    pub points: Vec<[f64; 2]>,
    pub strip: StripImage,
}

/// Turns published frames into drawable geometry.
///
/// Caches the last model and only rebuilds when a frame with a new
/// sequence number arrives.
pub struct RenderSink {
    colors: Arc<ColorTable>,
    strip_rows: usize,
    model: Option<RenderModel>,
}

impl RenderSink {
    pub fn new(colors: Arc<ColorTable>, strip_rows: usize) -> Self {
        Self {
            colors,
            strip_rows: strip_rows.max(1),
            model: None,
        }
    }

    /// Rebuild from `frame` if it is new. Returns true when the model changed.
    pub fn on_frame(&mut self, frame: &ProcessedFrame) -> bool {
        if self.model.as_ref().is_some_and(|m| m.sequence == frame.sequence) {
            return false;
        }

        let row = strip_colors(&frame.intensities, &self.colors);
        self.model = Some(RenderModel {
            sequence: frame.sequence,
            points: frame.points().map(|(x, y)| [x, y]).collect(),
            strip: StripImage::from_row(&row, self.strip_rows),
        });
        true
    }

    pub fn model(&self) -> Option<&RenderModel> {
        self.model.as_ref()
    }
}

/// Data point under the cursor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HoverReadout {
    pub wavelength: f64,
    pub intensity: f64,
}

impl fmt::Display for HoverReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "λ = {:.1} nm   I = {:.0}", self.wavelength, self.intensity)
    }
}

/// Snap a cursor wavelength to the nearest channel of `frame`
pub fn hover_readout(frame: &ProcessedFrame, cursor_nm: f64) -> Option<HoverReadout> {
    let index = frame.wavelengths.nearest_index(cursor_nm)?;
    Some(HoverReadout {
        wavelength: frame.wavelengths.as_slice()[index],
        intensity: frame.intensities[index],
    })
}

/// Lets at most one hover update through per interval
pub struct HoverThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl HoverThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
