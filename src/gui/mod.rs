// src/gui/mod.rs
pub mod theme;
pub mod widgets;

use eframe::egui;
use egui_plot::{HLine, Line, Plot, PlotPoints, VLine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::{Notification, RunState};
use crate::export::PlotView;
use crate::input::InputAction;
use crate::render::{hover_readout, HoverReadout, HoverThrottle, RenderSink};
use crate::session::AppContext;

use crate::gui::widgets::StatusLine;

// Main Application GUI - pulls frames from the store and forwards user input
pub struct LiveSpectrumApp {
    /// Store, input routing and notifications from the running session
    session: AppContext,

    /// Frame → plot points + strip pixels (cached per sequence)
    sink: RenderSink,

    /// Detector strip on the GPU, updated in place
    strip_texture: Option<egui::TextureHandle>,

    /// Mirrors the acquisition thread's state for the toolbar
    run_state: RunState,

    status: StatusLine,

    /// Hover updates are sampled, not processed per pointer event
    throttle: HoverThrottle,
    hover: Option<HoverReadout>,

    /// Last visible plot range, reproduced by image exports
    view: Option<PlotView>,

    /// Set once a device read stalls; never cleared
    hard_fault: Option<String>,

    /// Raised by the signal handler to request a clean close
    close_requested: Arc<AtomicBool>,

    title: String,
    refresh_period: Duration,
    stall_limit: Duration,
}

impl LiveSpectrumApp {
    pub fn new(session: AppContext, close_requested: Arc<AtomicBool>) -> Self {
        let sink = RenderSink::new(Arc::clone(&session.colors), session.config.display.strip_rows);
        let throttle = HoverThrottle::new(session.config.display.hover_interval());
        let refresh_period = session.config.acquisition.refresh_period();
        let stall_limit = session.config.acquisition.stall_limit();
        let title = session.info.to_string();

        Self {
            session,
            sink,
            strip_texture: None,
            run_state: RunState::Stopped,
            status: StatusLine::default(),
            throttle,
            hover: None,
            view: None,
            hard_fault: None,
            close_requested,
            title,
            refresh_period,
            stall_limit,
        }
    }

    fn dispatch(&mut self, action: InputAction) {
        if let Err(e) = self.session.input.dispatch(action, self.view) {
            tracing::error!("[GUI] {}", e);
            self.status.show_for(e.to_string(), Duration::from_secs(4), Instant::now());
        }
    }

    /// Apply everything the worker threads sent since the last frame
    fn drain_notifications(&mut self) {
        let now = Instant::now();
        while let Ok(note) = self.session.notifications.try_recv() {
            if let Notification::RunState(state) = note {
                self.run_state = state;
            }
            self.status.show_for(note.text(), note.linger(), now);
        }
    }

    /// A device read running far past its expected time is a hard fault
    fn check_watchdog(&mut self) {
        if self.hard_fault.is_some() {
            return;
        }
        if let Some(elapsed) = self.session.in_flight.stalled(Instant::now(), self.stall_limit) {
            let msg = format!("Device not responding ({:.1} s)", elapsed.as_secs_f32());
            tracing::error!("[GUI] ❌ {}", msg);
            self.hard_fault = Some(msg);
        }
    }

    /// Pull the latest frame and refresh the strip texture if it is new
    fn refresh_frame(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.session.store.latest() else { return };
        if !self.sink.on_frame(&frame) {
            return;
        }
        let Some(model) = self.sink.model() else { return };

        let image = theme::strip_to_color_image(&model.strip);
        match &mut self.strip_texture {
            Some(texture) => texture.set(image, egui::TextureOptions::NEAREST),
            None => {
                self.strip_texture = Some(ctx.load_texture("ccd_strip", image, egui::TextureOptions::NEAREST));
            }
        }
    }

    fn draw_plot(&mut self, ui: &mut egui::Ui, height: f32) {
        let Some(model) = self.sink.model() else {
            ui.allocate_ui(egui::vec2(ui.available_width(), height), |ui| {
                ui.centered_and_justified(|ui| ui.label("Waiting for the first spectrum..."));
            });
            return;
        };

        let points = PlotPoints::from(model.points.clone());
        let crosshair = self.hover;

        let response = Plot::new("spectrum")
            .height(height)
            .x_axis_label("Wavelength (nm)")
            .y_axis_label("Counts")
            .allow_boxed_zoom(true)
            .allow_drag(true)
            .allow_scroll(true)
            .allow_zoom(true)
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new(points).color(theme::CURVE_COLOR).width(theme::CURVE_WIDTH));

                if let Some(h) = crosshair {
                    plot_ui.vline(VLine::new(h.wavelength).color(theme::CROSSHAIR_COLOR));
                    plot_ui.hline(HLine::new(h.intensity).color(theme::CROSSHAIR_COLOR));
                }

                (plot_ui.pointer_coordinate(), plot_ui.plot_bounds())
            });

        let (pointer, bounds) = response.inner;
        self.view = Some(PlotView {
            x: (bounds.min()[0], bounds.max()[0]),
            y: (bounds.min()[1], bounds.max()[1]),
        });

        if let Some(pointer) = pointer {
            if self.throttle.admit(Instant::now()) {
                self.update_hover(pointer.x);
            }
        }
    }

    fn update_hover(&mut self, cursor_nm: f64) {
        let Some(frame) = self.session.store.latest() else { return };
        if let Some(readout) = hover_readout(&frame, cursor_nm) {
            self.status.show_sticky(readout.to_string());
            self.hover = Some(readout);
        }
    }

    fn draw_strip(&self, ui: &mut egui::Ui) {
        let (rect, _) = ui.allocate_exact_size(
            egui::vec2(ui.available_width(), theme::STRIP_HEIGHT),
            egui::Sense::hover(),
        );
        if let Some(texture) = &self.strip_texture {
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            ui.painter().image(texture.id(), rect, uv, egui::Color32::WHITE);
        } else {
            ui.painter().rect_filled(rect, 0.0, egui::Color32::BLACK);
        }
    }
}

impl eframe::App for LiveSpectrumApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // === Process signals / hotkeys ===
        if self.close_requested.load(Ordering::Relaxed) {
            tracing::info!("[GUI] Close requested by signal");
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let pressed: Vec<InputAction> = ctx.input(|i| {
            InputAction::ALL
                .into_iter()
                .filter(|action| i.key_pressed(action.hotkey()))
                .collect()
        });
        for action in pressed {
            self.dispatch(action);
        }

        // === Worker state ===
        self.drain_notifications();
        self.check_watchdog();
        self.refresh_frame(ctx);

        // === Layout ===
        let mut clicked = None;
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            clicked = widgets::toolbar(ui, self.run_state, &self.title);
        });
        if let Some(action) = clicked {
            self.dispatch(action);
        }

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            widgets::status_bar(ui, &self.status, self.hard_fault.as_deref());
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let plot_height = (ui.available_height() - theme::STRIP_HEIGHT - ui.spacing().item_spacing.y).max(100.0);
            self.draw_plot(ui, plot_height);
            self.draw_strip(ui);
        });

        // Frames arrive at the refresh cadence; no need to spin faster
        ctx.request_repaint_after(self.refresh_period);
    }
}
