//! Raw-mode terminal guard

use std::io::{Write, stdout};

use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use tracing::warn;

use crate::error::{PlayerError, Result};

/// Raw mode and the alternate screen for as long as the guard lives
///
/// Dropping the guard restores the terminal, including on early returns.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn enter() -> Result<Self> {
        enable_raw_mode()
            .map_err(|e| PlayerError::Terminal(format!("failed to enable raw mode: {e}")))?;

        // From here on, Drop undoes whatever succeeded
        let guard = Self { _private: () };
        execute!(stdout(), EnterAlternateScreen, Hide)
            .map_err(|e| PlayerError::Terminal(format!("failed to prepare screen: {e}")))?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut out = stdout();
        if let Err(e) = execute!(out, Show, LeaveAlternateScreen) {
            warn!(error = %e, "Failed to leave alternate screen");
        }
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to disable raw mode");
        }
        let _ = out.flush();
    }
}
