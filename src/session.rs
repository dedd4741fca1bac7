use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::color::ColorTable;
use crate::config::AppConfig;
use crate::device::{open_first_available, DeviceBackend, DeviceError, DeviceInfo, Spectrometer};
use crate::events::{Command, Notification};
use crate::export::{self, ExportManager};
use crate::fault::Fault;
use crate::frame::{FrameStore, WavelengthAxis};
use crate::input::InputController;
use crate::scheduler::{AcquisitionScheduler, InFlight};

/// How long teardown waits for the export worker to drain
const EXPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// An opened device plus everything derived from it once per session:
/// the wavelength axis, the color table and the (empty) frame store.
pub struct Session {
    device: Box<dyn Spectrometer>,
    info: DeviceInfo,
    axis: Arc<WavelengthAxis>,
    colors: Arc<ColorTable>,
    store: FrameStore,
    config: AppConfig,
}

/// What the GUI needs from a running session
pub struct AppContext {
    pub info: DeviceInfo,
    pub store: FrameStore,
    pub colors: Arc<ColorTable>,
    pub input: InputController,
    pub notifications: Receiver<Notification>,
    pub in_flight: InFlight,
    pub config: AppConfig,
}

/// Handles kept by main to stop the session after the window closes
pub struct Teardown {
    commands: Sender<Command>,
    device_rx: Receiver<Box<dyn Spectrometer>>,
    acquisition: JoinHandle<()>,
    export_worker: JoinHandle<()>,
    grace: Duration,
}

impl Session {
    /// Open the first available device and prepare the session.
    /// Any failure here is a startup fault.
    pub fn open(backend: &dyn DeviceBackend, config: AppConfig) -> Result<Self, Fault> {
        let mut device = open_first_available(backend).map_err(Fault::Startup)?;

        match Self::prepare(device.as_mut(), &config) {
            Ok(axis) => {
                let info = device.info().clone();
                let axis = Arc::new(axis);
                let colors = Arc::new(ColorTable::from_axis(&axis));
                let (lo, hi) = axis.range();
                tracing::info!("[Device] {} channels, {:.1}–{:.1} nm", axis.len(), lo, hi);

                Ok(Self {
                    device,
                    info,
                    axis,
                    colors,
                    store: FrameStore::new(),
                    config,
                })
            }
            Err(e) => {
                let _ = device.close();
                Err(Fault::Startup(e))
            }
        }
    }

    fn prepare(device: &mut dyn Spectrometer, config: &AppConfig) -> Result<WavelengthAxis, DeviceError> {
        device.set_integration_time_micros(config.acquisition.integration_time_micros())?;
        let axis = WavelengthAxis::new(device.wavelengths()?)?;
        Ok(axis)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Spawn the acquisition thread and the export worker
    pub fn start(self) -> io::Result<(AppContext, Teardown)> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let (note_tx, note_rx) = unbounded();
        let (device_tx, device_rx) = bounded(1);

        let grace = self.config.acquisition.stall_limit() + self.config.acquisition.refresh_period();

        let scheduler = AcquisitionScheduler::new(
            self.device,
            Arc::clone(&self.axis),
            self.config.acquisition.clone(),
            self.store.clone(),
            note_tx.clone(),
        );
        let in_flight = scheduler.in_flight();

        let acquisition = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let device = scheduler.run(cmd_rx);
                let _ = device_tx.send(device);
            })?;

        let manager = ExportManager::new(
            self.config.export.clone(),
            self.store.clone(),
            Arc::clone(&self.colors),
            self.info.to_string(),
        );
        let export_worker = export::spawn_worker(manager, job_rx, note_tx)?;

        let context = AppContext {
            info: self.info,
            store: self.store,
            colors: self.colors,
            input: InputController::new(cmd_tx.clone(), job_tx),
            notifications: note_rx,
            in_flight,
            config: self.config,
        };
        let teardown = Teardown {
            commands: cmd_tx,
            device_rx,
            acquisition,
            export_worker,
            grace,
        };

        Ok((context, teardown))
    }
}

impl Teardown {
    /// Stop acquisition, wait for pending exports and close the device.
    /// Always completes; failures are logged and swallowed.
    pub fn shutdown(self) {
        tracing::info!("[Main] Shutting down acquisition...");
        let _ = self.commands.send(Command::Stop);
        let _ = self.commands.send(Command::Shutdown);

        match self.device_rx.recv_timeout(self.grace) {
            Ok(mut device) => {
                let _ = self.acquisition.join();
                if let Err(e) = device.close() {
                    Fault::Shutdown(e).log();
                } else {
                    tracing::info!("[Main] ✓ Device closed");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                Fault::Shutdown(DeviceError::NotResponding(self.grace)).log();
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("[Main] Acquisition thread ended without returning the device");
                let _ = self.acquisition.join();
            }
        }

        // The worker exits once the GUI's job sender is dropped
        let deadline = Instant::now() + EXPORT_DRAIN_TIMEOUT;
        while !self.export_worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        if self.export_worker.is_finished() {
            let _ = self.export_worker.join();
        } else {
            tracing::warn!("[Main] Export worker still busy, not waiting for it");
        }
    }
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockBackend, MockSpectrometer};
    use crate::device::SimulatedBackend;
    use crate::events::RunState;
    use std::sync::Mutex;

    fn backend(mock: MockSpectrometer) -> MockBackend {
        MockBackend {
            device: Mutex::new(Some(mock)),
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.acquisition.refresh_period_ms = 5;
        config.acquisition.integration_time_ms = 1;
        config
    }

    #[test]
    fn test_open_failures_are_startup_faults() {
        let empty = MockBackend { device: Mutex::new(None) };
        let fault = Session::open(&empty, AppConfig::default()).err().unwrap();
        assert!(fault.is_fatal());
        assert!(matches!(fault, Fault::Startup(DeviceError::NoDevicesFound)));

        // A device with an unusable calibration never starts either
        let broken = backend(MockSpectrometer::new(vec![500.0, 400.0]));
        let fault = Session::open(&broken, AppConfig::default()).err().unwrap();
        assert!(matches!(fault, Fault::Startup(DeviceError::InvalidCalibration(_))));
    }

    #[test]
    fn test_open_builds_session_state() {
        let session = Session::open(&SimulatedBackend, AppConfig::default()).unwrap();
        assert_eq!(session.axis.len(), session.colors.len());
        assert!(session.store.latest().is_none());
        assert_eq!(session.info().to_string(), "USB2000 (simulated)  S/N: SIM00001");
    }

    #[test]
    fn test_start_and_shutdown() {
        let mock = MockSpectrometer::new(vec![400.0, 500.0, 600.0]);
        let reads = mock.read_counter();
        let session = Session::open(&backend(mock), fast_config()).unwrap();

        let (context, teardown) = session.start().unwrap();
        assert_eq!(
            context.notifications.recv_timeout(Duration::from_secs(1)),
            Ok(Notification::RunState(RunState::Running))
        );

        thread::sleep(Duration::from_millis(50));
        assert!(context.store.latest().is_some());

        drop(context);
        teardown.shutdown();
        assert!(reads.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_close_failure_is_swallowed() {
        let mut mock = MockSpectrometer::new(vec![400.0, 500.0]);
        mock.close_error = Some(DeviceError::CloseFailed("usb reset".into()));
        let session = Session::open(&backend(mock), fast_config()).unwrap();

        let (context, teardown) = session.start().unwrap();
        drop(context);

        // Completes without panicking or propagating
        teardown.shutdown();
    }
}
