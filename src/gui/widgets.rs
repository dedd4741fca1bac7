use eframe::egui::{self, RichText, Ui};
use std::time::{Duration, Instant};

use crate::events::RunState;
use crate::gui::theme;
use crate::input::InputAction;

// =======================================================================================
// TOOLBAR
// =======================================================================================

/// Buttons mirroring the hotkeys. Returns the clicked action, if any.
pub fn toolbar(ui: &mut Ui, run_state: RunState, title: &str) -> Option<InputAction> {
    let mut clicked = None;

    ui.horizontal(|ui| {
        for action in InputAction::ALL {
            let label = match (action, run_state) {
                (InputAction::TogglePause, RunState::Paused) => "▶ Resume",
                (InputAction::TogglePause, _) => "⏸ Pause",
                (other, _) => other.label(),
            };
            let hint = format!("{:?} key", action.hotkey());
            if ui.button(label).on_hover_text(hint).clicked() {
                clicked = Some(action);
            }
        }

        // Device title on the right
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            ui.label(RichText::new(title).strong());
            if run_state == RunState::Paused {
                ui.label(RichText::new("PAUSED").color(theme::PAUSED_COLOR).strong());
            }
        });
    });

    clicked
}

// =======================================================================================
// STATUS BAR
// =======================================================================================

/// Single status message, either timed or sticky (until replaced)
#[derive(Default)]
pub struct StatusLine {
    text: String,
    expires: Option<Instant>,
}

impl StatusLine {
    /// Show `text` for `linger`, then clear
    pub fn show_for(&mut self, text: String, linger: Duration, now: Instant) {
        self.text = text;
        self.expires = Some(now + linger);
    }

    /// Show `text` until something replaces it
    pub fn show_sticky(&mut self, text: String) {
        self.text = text;
        self.expires = None;
    }

    pub fn current(&self, now: Instant) -> Option<&str> {
        if self.text.is_empty() || self.expires.is_some_and(|t| now >= t) {
            return None;
        }
        Some(&self.text)
    }
}

/// Status text on the left, a persistent hard fault (if any) on the right
pub fn status_bar(ui: &mut Ui, status: &StatusLine, hard_fault: Option<&str>) {
    ui.horizontal(|ui| {
        ui.label(status.current(Instant::now()).unwrap_or(""));

        if let Some(fault) = hard_fault {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(RichText::new(format!("⚠ {fault}")).color(theme::FAULT_COLOR).strong());
            });
        }
    });
}
