//! Status view
//!
//! Renders the playback snapshot as a handful of text lines. Line building
//! is separate from drawing so it can be checked without a terminal.

use std::io::Write;
use std::time::Duration;

use crossterm::cursor::{MoveTo, MoveToNextLine};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{QueueableCommand, queue};

use crate::audio::PlaybackState;
use crate::control::SessionPhase;
use crate::error::{PlayerError, Result};
use crate::features::{Action, KeyBindings};

/// Everything the view needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub phase: SessionPhase,
}

/// Receiver of status snapshots
pub trait StatusView {
    fn render(&mut self, snapshot: &StatusSnapshot) -> Result<()>;
}

/// Format a duration as `m:ss`, or `h:mm:ss` past an hour
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs_f64().round() as u64;
    let (hours, mins, secs) = (total / 3600, total / 60 % 60, total % 60);

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Static instruction lines plus the per-frame rows
pub struct StatusLayout {
    header: Vec<String>,
    position_label: String,
    volume_label: String,
    speed_label: String,
}

impl StatusLayout {
    pub fn new(keybindings: &KeyBindings) -> Self {
        let key = |action: Action| keybindings.display_for_action(&action);

        Self {
            header: vec![
                "Welcome to the Speedy Player!".to_string(),
                format!("Press [{}] to quit.", key(Action::Quit)),
                format!("Press [{}] to pause or resume.", key(Action::TogglePause)),
                "Use the keys in brackets to adjust position, volume and speed.".to_string(),
            ],
            position_label: row_label("Position", key(Action::SeekBackward), key(Action::SeekForward)),
            volume_label: row_label("Volume", key(Action::VolumeDown), key(Action::VolumeUp)),
            speed_label: row_label("Speed", key(Action::SpeedDown), key(Action::SpeedUp)),
        }
    }

    /// All lines for one frame
    pub fn lines(&self, snapshot: &StatusSnapshot) -> Vec<String> {
        let state = &snapshot.state;
        let mut lines = self.header.clone();

        lines.push(String::new());
        lines.push(format!(
            "{} {} / {}",
            self.position_label,
            format_clock(state.elapsed()),
            format_clock(state.total())
        ));
        lines.push(format!("{} {:.1}", self.volume_label, state.gain));
        lines.push(format!("{} {:.3}x", self.speed_label, state.speed_ratio));
        lines.push(String::new());

        match &state.fault {
            Some(fault) => lines.push(format!("{} ({})", snapshot.phase.display_name(), fault)),
            None => lines.push(snapshot.phase.display_name().to_string()),
        }
        lines
    }
}

fn row_label(name: &str, down: String, up: String) -> String {
    format!("{:<8} ({}/{}):", name, down, up)
}

/// Full-screen redraw on a crossterm writer
pub struct TerminalView<W: Write> {
    out: W,
    layout: StatusLayout,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W, keybindings: &KeyBindings) -> Self {
        Self {
            out,
            layout: StatusLayout::new(keybindings),
        }
    }

    fn draw(&mut self, snapshot: &StatusSnapshot) -> std::io::Result<()> {
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All))?;
        for line in self.layout.lines(snapshot) {
            self.out.queue(Print(line))?.queue(MoveToNextLine(1))?;
        }
        self.out.flush()
    }
}

impl<W: Write> StatusView for TerminalView<W> {
    fn render(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        self.draw(snapshot)
            .map_err(|e| PlayerError::Terminal(format!("failed to draw status: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::keybindings::{KeyBinding, KeyCode};

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            state: PlaybackState {
                position: 3 * 44100 + 22050,
                length: 30 * 44100,
                sample_rate: 44100,
                paused: false,
                ended: false,
                restarts: 0,
                gain: 0.9,
                speed_ratio: 16.0 / 15.0,
                fault: None,
            },
            phase: SessionPhase::Playing,
        }
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::ZERO), "0:00");
        assert_eq!(format_clock(Duration::from_millis(59_600)), "1:00");
        assert_eq!(format_clock(Duration::from_secs(754)), "12:34");
        assert_eq!(format_clock(Duration::from_secs(3600 + 62)), "1:01:02");
    }

    #[test]
    fn test_layout_rows() {
        let layout = StatusLayout::new(&KeyBindings::default());
        let lines = layout.lines(&snapshot());

        assert_eq!(lines[0], "Welcome to the Speedy Player!");
        assert_eq!(lines[1], "Press [ESC] to quit.");
        assert_eq!(lines[2], "Press [SPACE] to pause or resume.");
        assert!(lines.contains(&"Position (Q/W): 0:04 / 0:30".to_string()));
        assert!(lines.contains(&"Volume   (A/S): 0.9".to_string()));
        assert!(lines.contains(&"Speed    (Z/X): 1.067x".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("Playing"));
    }

    #[test]
    fn test_layout_follows_custom_bindings() {
        let mut bindings = KeyBindings::default();
        bindings.set(Action::SeekBackward, vec![KeyBinding::new(KeyCode::Left)]);
        bindings.set(Action::SeekForward, vec![KeyBinding::new(KeyCode::Right)]);

        let lines = StatusLayout::new(&bindings).lines(&snapshot());
        assert!(lines.iter().any(|l| l.starts_with("Position (←/→):")));
    }

    #[test]
    fn test_fault_is_shown_with_phase() {
        let mut snapshot = snapshot();
        snapshot.phase = SessionPhase::Ended;
        snapshot.state.ended = true;
        snapshot.state.fault = Some("transport error: connection reset".to_string());

        let lines = StatusLayout::new(&KeyBindings::default()).lines(&snapshot);
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Ended (transport error: connection reset)")
        );
    }

    #[test]
    fn test_terminal_view_writes_rows() {
        let mut view = TerminalView::new(Vec::new(), &KeyBindings::default());
        view.render(&snapshot()).unwrap();

        let written = String::from_utf8_lossy(&view.out).into_owned();
        assert!(written.contains("Welcome to the Speedy Player!"));
        assert!(written.contains("Speed    (Z/X): 1.067x"));
    }
}
