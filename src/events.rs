use std::fmt;
use std::time::{Duration, Instant};

/// Whether scheduled ticks acquire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Before the session starts and after it stops
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "Stopped"),
            RunState::Running => write!(f, "Running"),
            RunState::Paused => write!(f, "Paused"),
        }
    }
}

/// Control messages for the acquisition thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Toggle,
    Stop,
    Shutdown,
}

/// Everything the acquisition loop reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Periodic refresh, stamped with its scheduled instant
    Tick(Instant),
    Command(Command),
}

/// Which export a job or notification refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    /// Delimited text only
    Data,
    /// Plot + strip images
    Visual,
    /// Fresh directory with text and both images
    All,
}

/// Status updates pushed to the GUI
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    RunState(RunState),
    ReadFault(String),
    Exported { kind: ExportKind, message: String },
    ExportFailed(String),
}

impl Notification {
    /// Status bar text
    pub fn text(&self) -> String {
        match self {
            Notification::RunState(RunState::Paused) => "Paused".to_string(),
            Notification::RunState(RunState::Running) => "Live".to_string(),
            Notification::RunState(RunState::Stopped) => "Stopped".to_string(),
            Notification::ReadFault(msg) => format!("Read failed: {msg}"),
            Notification::Exported { message, .. } => message.clone(),
            Notification::ExportFailed(msg) => format!("Export failed: {msg}"),
        }
    }

    /// How long the message stays in the status bar
    pub fn linger(&self) -> Duration {
        match self {
            Notification::RunState(_) => Duration::from_millis(2000),
            Notification::Exported { kind: ExportKind::Data, .. } => Duration::from_millis(3000),
            Notification::Exported { .. } => Duration::from_millis(4000),
            Notification::ReadFault(_) | Notification::ExportFailed(_) => Duration::from_millis(4000),
        }
    }
}

/// Side effects requested by [`transition`]
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Run one acquisition (averages × device reads)
    Acquire,
    Notify(Notification),
    /// Leave the acquisition loop
    Exit,
}

/// Pure state machine for the acquisition loop.
///
/// Stopped → Running on Start; Running ⇄ Paused on Toggle; any state →
/// Stopped on Stop or Shutdown. A tick only acquires while Running.
pub fn transition(state: RunState, event: &Event) -> (RunState, Vec<Effect>) {
    use RunState::*;

    match (state, event) {
        (Running, Event::Tick(_)) => (Running, vec![Effect::Acquire]),
        (s, Event::Tick(_)) => (s, Vec::new()),

        (Stopped, Event::Command(Command::Start)) => {
            (Running, vec![Effect::Notify(Notification::RunState(Running))])
        }
        (s, Event::Command(Command::Start)) => (s, Vec::new()),

        (Running, Event::Command(Command::Toggle)) => {
            (Paused, vec![Effect::Notify(Notification::RunState(Paused))])
        }
        (Paused, Event::Command(Command::Toggle)) => {
            (Running, vec![Effect::Notify(Notification::RunState(Running))])
        }
        (Stopped, Event::Command(Command::Toggle)) => (Stopped, Vec::new()),

        (Stopped, Event::Command(Command::Stop)) => (Stopped, Vec::new()),
        (_, Event::Command(Command::Stop)) => {
            (Stopped, vec![Effect::Notify(Notification::RunState(Stopped))])
        }

        (_, Event::Command(Command::Shutdown)) => (Stopped, vec![Effect::Exit]),
    }
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> Event {
        Event::Tick(Instant::now())
    }

    fn cmd(c: Command) -> Event {
        Event::Command(c)
    }

    #[test]
    fn test_tick_acquires_only_while_running() {
        assert_eq!(transition(RunState::Running, &tick()), (RunState::Running, vec![Effect::Acquire]));
        assert_eq!(transition(RunState::Paused, &tick()), (RunState::Paused, vec![]));
        assert_eq!(transition(RunState::Stopped, &tick()), (RunState::Stopped, vec![]));
    }

    #[test]
    fn test_double_toggle_returns_to_start() {
        let (s, fx) = transition(RunState::Paused, &cmd(Command::Toggle));
        assert_eq!(s, RunState::Running);
        assert_eq!(fx, vec![Effect::Notify(Notification::RunState(RunState::Running))]);

        let (s, fx) = transition(s, &cmd(Command::Toggle));
        assert_eq!(s, RunState::Paused);
        assert!(!fx.contains(&Effect::Acquire));
    }

    #[test]
    fn test_start_stop_shutdown() {
        let (s, _) = transition(RunState::Stopped, &cmd(Command::Start));
        assert_eq!(s, RunState::Running);

        // Start is a no-op once running
        assert_eq!(transition(s, &cmd(Command::Start)), (RunState::Running, vec![]));

        let (s, fx) = transition(RunState::Paused, &cmd(Command::Stop));
        assert_eq!(s, RunState::Stopped);
        assert_eq!(fx.len(), 1);

        // Toggle can't start a stopped session
        assert_eq!(transition(RunState::Stopped, &cmd(Command::Toggle)).0, RunState::Stopped);

        let (s, fx) = transition(RunState::Running, &cmd(Command::Shutdown));
        assert_eq!(s, RunState::Stopped);
        assert_eq!(fx, vec![Effect::Exit]);
    }

    #[test]
    fn test_notification_linger() {
        let paused = Notification::RunState(RunState::Paused);
        assert_eq!(paused.text(), "Paused");
        assert_eq!(paused.linger(), Duration::from_secs(2));

        let csv = Notification::Exported {
            kind: ExportKind::Data,
            message: "Saved a.csv".into(),
        };
        assert_eq!(csv.linger(), Duration::from_secs(3));

        let all = Notification::Exported {
            kind: ExportKind::All,
            message: "Saved dir".into(),
        };
        assert_eq!(all.linger(), Duration::from_secs(4));
    }
}
