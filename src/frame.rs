use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

/// Raw detector counts from a single device read, one value per channel
pub type RawFrame = Vec<f64>;

// ========================================================================
// WALL CLOCK
// ========================================================================
//    `time` refuses to look up the local offset once other threads exist,
//    so main() captures it before anything is spawned.

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Capture the local UTC offset. Must run before any thread is spawned.
pub fn init_local_offset() -> UtcOffset {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    *LOCAL_OFFSET.get_or_init(|| offset)
}

/// Current wall-clock time in the offset captured at startup (UTC otherwise)
pub fn local_now() -> OffsetDateTime {
    let offset = LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC);
    OffsetDateTime::now_utc().to_offset(offset)
}

// ========================================================================
// WAVELENGTH AXIS
// ========================================================================

/// Why a calibration array was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AxisError {
    #[error("wavelength axis is empty")]
    Empty,

    #[error("wavelength axis has a non-finite value at channel {index}")]
    NonFinite { index: usize },

    #[error("wavelength axis is not strictly increasing at channel {index}")]
    NotIncreasing { index: usize },
}

/// Frame/axis length disagreement
#[derive(Debug, Clone, PartialEq, Error)]
#[error("frame has {actual} samples but the wavelength axis has {expected} channels")]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Channel → wavelength calibration (nm), strictly increasing.
///
/// Fixed for the lifetime of a device session and shared read-only
/// (behind an `Arc`) by every downstream component.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthAxis {
    nm: Vec<f64>,
}

impl WavelengthAxis {
    pub fn new(nm: Vec<f64>) -> Result<Self, AxisError> {
        if nm.is_empty() {
            return Err(AxisError::Empty);
        }
        if let Some(index) = nm.iter().position(|v| !v.is_finite()) {
            return Err(AxisError::NonFinite { index });
        }
        if let Some(index) = nm.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AxisError::NotIncreasing { index: index + 1 });
        }
        Ok(Self { nm })
    }

    pub fn len(&self) -> usize {
        self.nm.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.nm
    }

    /// First and last wavelength
    pub fn range(&self) -> (f64, f64) {
        // Non-empty by construction
        (self.nm[0], self.nm[self.nm.len() - 1])
    }

    /// Index of the channel whose wavelength is closest to `nm`
    pub fn nearest_index(&self, nm: f64) -> Option<usize> {
        if nm.is_nan() {
            return None;
        }
        let upper = self.nm.partition_point(|&w| w < nm);
        if upper == 0 {
            return Some(0);
        }
        if upper == self.nm.len() {
            return Some(self.nm.len() - 1);
        }
        let below = upper - 1;
        if (nm - self.nm[below]) <= (self.nm[upper] - nm) {
            Some(below)
        } else {
            Some(upper)
        }
    }
}

// ========================================================================
// PROCESSED FRAME
// ========================================================================

/// One published spectrum. Immutable once built; a new frame replaces
/// the old one in the [`FrameStore`] rather than being edited in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    /// Shared calibration (same `Arc` for every frame of a session)
    pub wavelengths: Arc<WavelengthAxis>,

    /// Averaged + smoothed counts (never normalized)
    pub intensities: Vec<f64>,

    /// Wall-clock time the acquisition finished
    pub captured_at: OffsetDateTime,

    /// Monotonic frame number within the session, starting at 1
    pub sequence: u64,

    /// How long the device reads for this frame took
    pub acquisition_time: Duration,
}

impl ProcessedFrame {
    pub fn new(
        wavelengths: Arc<WavelengthAxis>,
        intensities: Vec<f64>,
        sequence: u64,
        acquisition_time: Duration,
    ) -> Result<Self, LengthMismatch> {
        if intensities.len() != wavelengths.len() {
            return Err(LengthMismatch {
                expected: wavelengths.len(),
                actual: intensities.len(),
            });
        }

        Ok(Self {
            wavelengths,
            intensities,
            captured_at: local_now(),
            sequence,
            acquisition_time,
        })
    }

    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// (wavelength, intensity) pairs in channel order
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths
            .as_slice()
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
    }

    /// Largest intensity in the frame
    pub fn max_intensity(&self) -> f64 {
        self.intensities
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest intensity in the frame
    pub fn min_intensity(&self) -> f64 {
        self.intensities
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

// ========================================================================
// FRAME STORE
// ========================================================================

/// Single-slot store for the latest processed frame.
///
/// One writer (the acquisition thread) swaps a whole `Arc<ProcessedFrame>`
/// under the lock; readers (GUI, export worker) clone the `Arc` out and
/// release the lock immediately. A reader therefore sees either the old
/// frame or the new one, never a mix.
#[derive(Clone, Default)]
pub struct FrameStore {
    slot: Arc<Mutex<Option<Arc<ProcessedFrame>>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Returns the shared handle that was stored.
    pub fn publish(&self, frame: ProcessedFrame) -> Arc<ProcessedFrame> {
        let frame = Arc::new(frame);
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::clone(&frame));
        frame
    }

    /// The frame currently in the store, if any acquisition has succeeded yet
    pub fn latest(&self) -> Option<Arc<ProcessedFrame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
