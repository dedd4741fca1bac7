/// Spectrometer device seam
/// A backend lists and opens devices; an open device reads one frame of
/// counts per call, blocking for its integration time.
///

use std::f64::consts::TAU;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::frame::{AxisError, LengthMismatch, RawFrame};

/// Identity of one attached spectrometer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific identifier used to open the device
    pub id: String,

    /// Human-readable model name
    pub model: String,

    pub serial_number: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  S/N: {}", self.model, self.serial_number)
    }
}

/// Error types for device operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("no spectrometers found")]
    NoDevicesFound,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to open device: {0}")]
    OpenFailed(String),

    #[error("device read failed: {0}")]
    ReadFailed(String),

    #[error(transparent)]
    FrameLength(#[from] LengthMismatch),

    #[error("invalid wavelength calibration: {0}")]
    InvalidCalibration(#[from] AxisError),

    #[error("device not responding for {0:?}")]
    NotResponding(Duration),

    #[error("failed to close device: {0}")]
    CloseFailed(String),
}

/// An open spectrometer
pub trait Spectrometer: Send {
    fn info(&self) -> &DeviceInfo;

    fn set_integration_time_micros(&mut self, micros: u32) -> Result<(), DeviceError>;

    /// Channel → wavelength calibration (nm)
    fn wavelengths(&self) -> Result<Vec<f64>, DeviceError>;

    /// Blocking read of one frame, one count per channel
    fn read_intensities(&mut self, dark_correct: bool) -> Result<RawFrame, DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Enumerates and opens spectrometers
pub trait DeviceBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn open(&self, id: &str) -> Result<Box<dyn Spectrometer>, DeviceError>;
}

/// Open the first device the backend reports
pub fn open_first_available(backend: &dyn DeviceBackend) -> Result<Box<dyn Spectrometer>, DeviceError> {
    let devices = backend.list_devices()?;
    let first = devices.first().ok_or(DeviceError::NoDevicesFound)?;

    tracing::info!("[Device] Found {} device(s), opening {}", devices.len(), first.id);
    let device = backend.open(&first.id)?;
    tracing::info!("[Device] Opened {}", device.info());

    Ok(device)
}

// ========================================================================
// SIMULATED BACKEND
// ========================================================================

const SIM_CHANNELS: usize = 3648;
const SIM_SATURATION: f64 = 4095.0;
const SIM_DARK_LEVEL: f64 = 90.0;
const SIM_NOISE: f64 = 4.0;

/// Hg-Ar lamp lines: (center nm, peak counts at 10 ms)
const SIM_LINES: [(f64, f64); 7] = [
    (253.65, 900.0),
    (435.83, 1800.0),
    (546.07, 2600.0),
    (696.54, 700.0),
    (763.51, 1500.0),
    (811.53, 1100.0),
    (912.30, 500.0),
];

/// Backend serving one simulated USB2000-style spectrometer
#[derive(Default)]
pub struct SimulatedBackend;

impl SimulatedBackend {
    fn device_info() -> DeviceInfo {
        DeviceInfo {
            id: "sim-0".to_string(),
            model: "USB2000 (simulated)".to_string(),
            serial_number: "SIM00001".to_string(),
        }
    }
}

impl DeviceBackend for SimulatedBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(vec![Self::device_info()])
    }

    fn open(&self, id: &str) -> Result<Box<dyn Spectrometer>, DeviceError> {
        let info = Self::device_info();
        if id != info.id {
            return Err(DeviceError::DeviceNotFound(id.to_string()));
        }
        Ok(Box::new(SimulatedSpectrometer::new(info)))
    }
}

/// Synthetic lamp spectrum with slow intensity drift, a dark baseline and
/// read noise. Reads block for the configured integration time.
pub struct SimulatedSpectrometer {
    info: DeviceInfo,
    wavelengths: Vec<f64>,
    integration: Duration,
    opened_at: Instant,
    rng_state: u64,
    closed: bool,
}

impl SimulatedSpectrometer {
    pub fn new(info: DeviceInfo) -> Self {
        // Slightly non-linear dispersion, like a real grating
        let wavelengths = (0..SIM_CHANNELS)
            .map(|i| {
                let i = i as f64;
                200.0 + 0.26 * i - 3.6e-6 * i * i
            })
            .collect();

        Self {
            info,
            wavelengths,
            integration: Duration::from_millis(10),
            opened_at: Instant::now(),
            rng_state: 0x2545_F491_4F6C_DD1D,
            closed: false,
        }
    }

    /// Uniform noise in [-1, 1] (xorshift64*)
    fn next_noise(&mut self) -> f64 {
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        (bits as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    fn synthesize(&mut self, dark_correct: bool) -> RawFrame {
        let scale = self.integration.as_secs_f64() / 0.010;
        let t = self.opened_at.elapsed().as_secs_f64();

        let mut frame = Vec::with_capacity(self.wavelengths.len());
        for i in 0..self.wavelengths.len() {
            let nm = self.wavelengths[i];

            // Broad continuum under the lines
            let mut signal = 120.0 * (-((nm - 650.0) / 220.0).powi(2)).exp();

            for (k, &(center, peak)) in SIM_LINES.iter().enumerate() {
                let drift = 1.0 + 0.08 * (TAU * t / 7.0 + k as f64).sin();
                signal += peak * drift * (-0.5 * ((nm - center) / 0.9).powi(2)).exp();
            }

            let mut counts = signal * scale + SIM_DARK_LEVEL + SIM_NOISE * self.next_noise();
            if dark_correct {
                counts -= SIM_DARK_LEVEL;
            }
            frame.push(counts.clamp(0.0, SIM_SATURATION));
        }
        frame
    }
}

impl Spectrometer for SimulatedSpectrometer {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn set_integration_time_micros(&mut self, micros: u32) -> Result<(), DeviceError> {
        if micros == 0 {
            return Err(DeviceError::OpenFailed("integration time must be positive".into()));
        }
        self.integration = Duration::from_micros(u64::from(micros));
        tracing::debug!("[Device] Integration time set to {:?}", self.integration);
        Ok(())
    }

    fn wavelengths(&self) -> Result<Vec<f64>, DeviceError> {
        Ok(self.wavelengths.clone())
    }

    fn read_intensities(&mut self, dark_correct: bool) -> Result<RawFrame, DeviceError> {
        if self.closed {
            return Err(DeviceError::ReadFailed("device is closed".into()));
        }
        thread::sleep(self.integration);
        Ok(self.synthesize(dark_correct))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::CloseFailed("already closed".into()));
        }
        self.closed = true;
        tracing::debug!("[Device] Closed {}", self.info.serial_number);
        Ok(())
    }
}

// ========================================================================
// MOCK (tests only)
// ========================================================================

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Scripted in-memory device: serves queued results in order, then
    /// repeats the fallback frame. Counts every read.
    pub struct MockSpectrometer {
        info: DeviceInfo,
        wavelengths: Vec<f64>,
        script: VecDeque<Result<RawFrame, DeviceError>>,
        fallback: RawFrame,
        pub read_delay: Duration,
        pub close_error: Option<DeviceError>,
        reads: Arc<AtomicUsize>,
    }

    impl MockSpectrometer {
        pub fn new(wavelengths: Vec<f64>) -> Self {
            let fallback = vec![1.0; wavelengths.len()];
            Self {
                info: DeviceInfo {
                    id: "mock-0".to_string(),
                    model: "Mock".to_string(),
                    serial_number: "M0".to_string(),
                },
                wavelengths,
                script: VecDeque::new(),
                fallback,
                read_delay: Duration::ZERO,
                close_error: None,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn push_frame(&mut self, frame: RawFrame) {
            self.script.push_back(Ok(frame));
        }

        pub fn push_failure(&mut self, message: &str) {
            self.script
                .push_back(Err(DeviceError::ReadFailed(message.to_string())));
        }

        /// Shared read counter, still readable after the mock is boxed away
        pub fn read_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.reads)
        }
    }

    impl Spectrometer for MockSpectrometer {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn set_integration_time_micros(&mut self, _micros: u32) -> Result<(), DeviceError> {
            Ok(())
        }

        fn wavelengths(&self) -> Result<Vec<f64>, DeviceError> {
            Ok(self.wavelengths.clone())
        }

        fn read_intensities(&mut self, _dark_correct: bool) -> Result<RawFrame, DeviceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if !self.read_delay.is_zero() {
                thread::sleep(self.read_delay);
            }
            self.script
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            match self.close_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    /// Backend handing out at most one prepared mock
    pub struct MockBackend {
        pub device: std::sync::Mutex<Option<MockSpectrometer>>,
    }

    impl DeviceBackend for MockBackend {
        fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
            let guard = self.device.lock().unwrap();
            Ok(guard.iter().map(|d| d.info.clone()).collect())
        }

        fn open(&self, id: &str) -> Result<Box<dyn Spectrometer>, DeviceError> {
            match self.device.lock().unwrap().take() {
                Some(d) if d.info.id == id => Ok(Box::new(d)),
                _ => Err(DeviceError::DeviceNotFound(id.to_string())),
            }
        }
    }
}
