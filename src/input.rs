use crossbeam_channel::{SendError, Sender};
use thiserror::Error;

use crate::events::{Command, ExportKind};
use crate::export::{ExportJob, PlotView};

/// Discrete user actions (hotkeys and toolbar buttons)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputAction {
    TogglePause,
    SaveCsv,
    SaveImages,
    SaveAll,
}

impl InputAction {
    pub const ALL: [InputAction; 4] = [
        InputAction::TogglePause,
        InputAction::SaveCsv,
        InputAction::SaveImages,
        InputAction::SaveAll,
    ];

    pub fn hotkey(self) -> egui::Key {
        match self {
            InputAction::TogglePause => egui::Key::Space,
            InputAction::SaveCsv => egui::Key::C,
            InputAction::SaveImages => egui::Key::P,
            InputAction::SaveAll => egui::Key::S,
        }
    }

    /// Toolbar button text
    pub fn label(self) -> &'static str {
        match self {
            InputAction::TogglePause => "Pause/Resume",
            InputAction::SaveCsv => "Save CSV",
            InputAction::SaveImages => "Save PNG",
            InputAction::SaveAll => "Save CSV+PNG",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("acquisition thread is gone")]
    SchedulerGone,

    #[error("export worker is gone")]
    ExportGone,
}

/// Routes user actions to the acquisition thread and the export worker.
/// Never blocks: both channels are unbounded.
pub struct InputController {
    commands: Sender<Command>,
    exports: Sender<ExportJob>,
}

impl InputController {
    pub fn new(commands: Sender<Command>, exports: Sender<ExportJob>) -> Self {
        Self { commands, exports }
    }

    /// `view` is the plot's current visible range, reproduced in image exports
    pub fn dispatch(&self, action: InputAction, view: Option<PlotView>) -> Result<(), InputError> {
        tracing::debug!("[GUI] Action: {:?}", action);

        let kind = match action {
            InputAction::TogglePause => {
                return self
                    .commands
                    .send(Command::Toggle)
                    .map_err(|SendError(_)| InputError::SchedulerGone);
            }
            InputAction::SaveCsv => ExportKind::Data,
            InputAction::SaveImages => ExportKind::Visual,
            InputAction::SaveAll => ExportKind::All,
        };

        self.exports
            .send(ExportJob { kind, view })
            .map_err(|SendError(_)| InputError::ExportGone)
    }
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_hotkeys_are_distinct() {
        let keys: Vec<egui::Key> = InputAction::ALL.iter().map(|a| a.hotkey()).collect();
        assert_eq!(keys, vec![egui::Key::Space, egui::Key::C, egui::Key::P, egui::Key::S]);
    }

    #[test]
    fn test_dispatch_routes_actions() {
        let (cmd_tx, cmd_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let input = InputController::new(cmd_tx, job_tx);

        let view = PlotView { x: (400.0, 500.0), y: (0.0, 10.0) };
        input.dispatch(InputAction::TogglePause, None).unwrap();
        input.dispatch(InputAction::SaveAll, Some(view)).unwrap();
        input.dispatch(InputAction::SaveCsv, None).unwrap();

        assert_eq!(cmd_rx.try_recv(), Ok(Command::Toggle));
        assert!(cmd_rx.try_recv().is_err());

        let jobs: Vec<_> = job_rx.try_iter().collect();
        assert_eq!(
            jobs,
            vec![
                ExportJob { kind: ExportKind::All, view: Some(view) },
                ExportJob { kind: ExportKind::Data, view: None },
            ]
        );
    }

    #[test]
    fn test_dispatch_reports_closed_channels() {
        let (cmd_tx, cmd_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let input = InputController::new(cmd_tx, job_tx);
        drop(cmd_rx);
        drop(job_rx);

        assert_eq!(input.dispatch(InputAction::TogglePause, None), Err(InputError::SchedulerGone));
        assert_eq!(input.dispatch(InputAction::SaveImages, None), Err(InputError::ExportGone));
    }
}
