use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver, Sender};

use crate::config::AcquisitionConfig;
use crate::device::{DeviceError, Spectrometer};
use crate::events::{transition, Command, Effect, Event, Notification, RunState};
use crate::fault::Fault;
use crate::frame::{FrameStore, LengthMismatch, ProcessedFrame, WavelengthAxis};
use crate::signal_processor::{ProcessError, SignalProcessor};

impl From<ProcessError> for DeviceError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Length(mismatch) => DeviceError::FrameLength(mismatch),
            ProcessError::NoFrames => DeviceError::ReadFailed("no frames were read".into()),
        }
    }
}

/// Start time of the acquisition currently in progress, shared with the
/// GUI so it can spot a device read that never returns.
#[derive(Clone, Default)]
pub struct InFlight(Arc<Mutex<Option<Instant>>>);

impl InFlight {
    fn begin(&self, at: Instant) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    fn end(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// How long the current acquisition has run, if that exceeds `limit`
    pub fn stalled(&self, now: Instant, limit: Duration) -> Option<Duration> {
        let started = (*self.0.lock().unwrap_or_else(PoisonError::into_inner))?;
        let elapsed = now.saturating_duration_since(started);
        (elapsed > limit).then_some(elapsed)
    }
}

/// Running totals, logged when the loop exits
#[derive(Clone, Debug)]
pub struct AcquisitionStats {
    pub frames: u64,
    pub faults: u64,
    pub dropped_ticks: u64,
    pub total_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self {
            frames: 0,
            faults: 0,
            dropped_ticks: 0,
            total_time: Duration::ZERO,
            min_time: Duration::MAX,
            max_time: Duration::ZERO,
        }
    }
}

impl AcquisitionStats {
    fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.total_time += elapsed;
        self.min_time = self.min_time.min(elapsed);
        self.max_time = self.max_time.max(elapsed);
    }

    fn log_summary(&self, refresh_period: Duration) {
        tracing::info!("[Acquire] Shutdown (published {} frames)", self.frames);
        if self.frames == 0 {
            return;
        }
        let avg = self.total_time / self.frames as u32;
        tracing::info!("[Acquire] === Final Acquisition Stats ===");
        tracing::info!("[Acquire]    Frames:        {}", self.frames);
        tracing::info!("[Acquire]    Read faults:   {}", self.faults);
        tracing::info!("[Acquire]    Dropped ticks: {}", self.dropped_ticks);
        tracing::info!("[Acquire]    Avg time:      {:?}", avg);
        tracing::info!("[Acquire]    Min time:      {:?}", self.min_time);
        tracing::info!("[Acquire]    Max time:      {:?}", self.max_time);

        let usage_pct = avg.as_secs_f64() / refresh_period.as_secs_f64().max(f64::EPSILON) * 100.0;
        tracing::info!("[Acquire]    Busy:          {:.1}% of refresh period", usage_pct);
    }
}

/// Owns the device for the session and turns ticks into published frames.
///
/// Everything runs on one thread, so at most one acquisition is ever in
/// flight. A tick stamped before the previous acquisition finished is
/// dropped, never queued. Commands are handled between ticks, so a pause
/// waits for an in-progress multi-read average to finish.
pub struct AcquisitionScheduler {
    device: Box<dyn Spectrometer>,
    axis: Arc<WavelengthAxis>,
    config: AcquisitionConfig,
    processor: SignalProcessor,
    store: FrameStore,
    state: RunState,
    in_flight: InFlight,
    last_finished: Option<Instant>,
    sequence: u64,
    notify: Sender<Notification>,
    stats: AcquisitionStats,
}

impl AcquisitionScheduler {
    pub fn new(
        device: Box<dyn Spectrometer>,
        axis: Arc<WavelengthAxis>,
        config: AcquisitionConfig,
        store: FrameStore,
        notify: Sender<Notification>,
    ) -> Self {
        let processor = SignalProcessor::from_config(&config);
        Self {
            device,
            axis,
            config,
            processor,
            store,
            state: RunState::Stopped,
            in_flight: InFlight::default(),
            last_finished: None,
            sequence: 0,
            notify,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Apply one event. Break means the loop should exit.
    pub fn handle(&mut self, event: Event) -> ControlFlow<()> {
        if let Event::Tick(at) = event {
            if self.state == RunState::Running && self.last_finished.is_some_and(|done| at < done) {
                self.stats.dropped_ticks += 1;
                tracing::trace!("[Acquire] Tick overlapped previous acquisition, dropped");
                return ControlFlow::Continue(());
            }
        }

        let (next, effects) = transition(self.state, &event);
        self.state = next;

        for effect in effects {
            match effect {
                Effect::Acquire => self.tick(),
                Effect::Notify(note) => {
                    tracing::info!("[Acquire] {}", note.text());
                    // A closed GUI channel only happens during teardown
                    let _ = self.notify.send(note);
                }
                Effect::Exit => return ControlFlow::Break(()),
            }
        }
        ControlFlow::Continue(())
    }

    /// One acquisition; a failure is reported and the old frame kept
    fn tick(&mut self) {
        match self.acquire() {
            Ok(frame) => {
                tracing::trace!(
                    "[Acquire] Frame {} in {:?} (peak {:.0})",
                    frame.sequence,
                    frame.acquisition_time,
                    frame.max_intensity()
                );
            }
            Err(e) => {
                self.stats.faults += 1;
                let fault = Fault::Read(e);
                fault.log();
                let _ = self.notify.send(Notification::ReadFault(fault.to_string()));
            }
        }
    }

    /// Read `averages` frames, process them and publish the result.
    /// Any failure aborts the whole tick before the store is touched.
    pub fn acquire(&mut self) -> Result<Arc<ProcessedFrame>, DeviceError> {
        let started = Instant::now();
        self.in_flight.begin(started);
        let result = self.read_and_process(started);
        self.in_flight.end();
        self.last_finished = Some(Instant::now());
        result
    }

    fn read_and_process(&mut self, started: Instant) -> Result<Arc<ProcessedFrame>, DeviceError> {
        let mut raw_frames = Vec::with_capacity(self.processor.averages());
        for _ in 0..self.processor.averages() {
            let raw = self.device.read_intensities(self.config.dark_correct)?;
            if raw.len() != self.axis.len() {
                return Err(LengthMismatch {
                    expected: self.axis.len(),
                    actual: raw.len(),
                }
                .into());
            }
            raw_frames.push(raw);
        }

        let intensities = self.processor.process(&raw_frames)?;
        let elapsed = started.elapsed();
        let frame = ProcessedFrame::new(Arc::clone(&self.axis), intensities, self.sequence + 1, elapsed)?;

        self.sequence += 1;
        self.stats.record(elapsed);
        Ok(self.store.publish(frame))
    }

    /// Run until Shutdown or until the command channel closes, then hand
    /// the device back for closing.
    pub fn run(mut self, commands: Receiver<Command>) -> Box<dyn Spectrometer> {
        let refresh = self.config.refresh_period();
        tracing::info!(
            "[Acquire] Starting: refresh {:?}, integration {:?} × {} averages, half-width {}",
            refresh,
            self.config.integration_time(),
            self.config.averages,
            self.config.smoothing_half_width
        );
        if self.config.expected_busy_time() > refresh {
            tracing::warn!(
                "[Acquire] Device busy time {:?} exceeds refresh period {:?}, ticks will be skipped",
                self.config.expected_busy_time(),
                refresh
            );
        }

        let ticker = tick(refresh);
        let _ = self.handle(Event::Command(Command::Start));

        loop {
            let event = select! {
                recv(ticker) -> at => match at {
                    Ok(at) => Event::Tick(at),
                    Err(_) => break,
                },
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => Event::Command(cmd),
                    Err(_) => {
                        tracing::debug!("[Acquire] Command channel closed");
                        break;
                    }
                },
            };

            if self.handle(event).is_break() {
                break;
            }
        }

        tracing::debug!("[Acquire] Loop exited while {}", self.state);
        self.stats.log_summary(refresh);
        self.device
    }
}
