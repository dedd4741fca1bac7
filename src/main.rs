mod color;
mod config;
mod device;
mod events;
mod export;
mod fault;
mod frame;
mod gui;
mod input;
mod logging;
mod render;
mod scheduler;
mod session;
mod signal_processor;

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use eframe::egui;

use crate::config::AppConfig;
use crate::device::SimulatedBackend;
use crate::fault::Fault;
use crate::gui::LiveSpectrumApp;
use crate::session::Session;

const APP_NAME: &str = "SpecLive";
const HOTKEY_HINT: &str = "[Space] pause  [C] CSV  [P] PNG  [S] all";

fn main() -> ExitCode {
    // Local offset must be read before any thread is spawned
    let offset = frame::init_local_offset();
    let _log_guard = logging::init(offset, config::log_dir().as_deref());

    tracing::info!("=== {} - Live Spectrometer ===", APP_NAME);

    match run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("[Main] ❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let config = AppConfig::load_or_default();
    let window_size = config.display.window_size;

    // ========================================================================
    // DEVICE
    // ========================================================================
    let session = match Session::open(&SimulatedBackend, config) {
        Ok(session) => session,
        Err(fault) if fault.is_fatal() => {
            fault.log();
            eprintln!("{}", startup_message(&fault));
            return Ok(ExitCode::FAILURE);
        }
        Err(fault) => return Err(fault).context("session setup failed"),
    };
    let title = format!("{} - {}  {}", APP_NAME, session.info(), HOTKEY_HINT);

    // ========================================================================
    // WORKER THREADS
    // ========================================================================
    let (context, teardown) = session.start().context("failed to spawn worker threads")?;

    // Ctrl-C / SIGTERM close the window the same way the close button does
    let close_requested = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&close_requested);

    // ========================================================================
    // GUI
    // ========================================================================
    tracing::info!("[Main] Starting GUI...");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(window_size)
            .with_title(title)
            .with_resizable(true),
        ..Default::default()
    };

    // Blocks until the window closes
    let result = eframe::run_native(
        APP_NAME,
        options,
        Box::new(move |_cc| Ok(Box::new(LiveSpectrumApp::new(context, close_requested)))),
    );

    teardown.shutdown();

    result.map_err(|e| anyhow::anyhow!("GUI failed: {e}"))?;
    tracing::info!("[Main] ✓ Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
fn install_signal_handlers(flag: &Arc<AtomicBool>) {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(flag)) {
            tracing::warn!("[Main] Could not install handler for signal {}: {}", signal, e);
        }
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_flag: &Arc<AtomicBool>) {}

/// Shown on stderr when the session can't start, outside of the log
fn startup_message(fault: &Fault) -> String {
    format!("{APP_NAME} could not start: {fault}")
}
