//! Control event producers
//!
//! Two threads feed the control loop through one unbounded channel:
//!
//! ## Architecture
//! ```text
//! input thread  (crossterm event::read) --[ControlEvent::Key]--> control loop
//! ticker thread (fixed interval)        --[ControlEvent::Tick]-> control loop
//! ```
//!
//! Both threads exit on their own once the control loop drops its receiver.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use tracing::{debug, error, info};

use crate::error::{PlayerError, Result};

/// How often the input thread checks whether the control loop is gone
const INPUT_POLL: Duration = Duration::from_millis(100);

/// Events consumed by the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A key was pressed
    Key(KeyEvent),
    /// Periodic refresh
    Tick,
    /// Terminal input is gone; end the session
    Quit,
}

/// Sender for control events (held by the producer threads)
pub type ControlEventSender = tokio::sync::mpsc::UnboundedSender<ControlEvent>;

/// Receiver for control events (held by the control loop)
pub type ControlEventReceiver = tokio::sync::mpsc::UnboundedReceiver<ControlEvent>;

/// Create a new control event channel
pub fn control_channel() -> (ControlEventSender, ControlEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Forward key presses from the terminal
///
/// Release and repeat events are dropped. A terminal read error is turned
/// into [`ControlEvent::Quit`] so the session can restore the terminal.
pub fn spawn_input_poller(events: ControlEventSender) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("input".to_string())
        .spawn(move || {
            info!("Input thread started");
            loop {
                if events.is_closed() {
                    break;
                }

                let ready = match event::poll(INPUT_POLL) {
                    Ok(ready) => ready,
                    Err(e) => {
                        error!(error = %e, "Terminal poll failed");
                        let _ = events.send(ControlEvent::Quit);
                        break;
                    }
                };
                if !ready {
                    continue;
                }

                match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        debug!(?key, "Key pressed");
                        if events.send(ControlEvent::Key(key)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Terminal read failed");
                        let _ = events.send(ControlEvent::Quit);
                        break;
                    }
                }
            }
            info!("Input thread exiting");
        })
        .map_err(|e| PlayerError::Terminal(format!("failed to spawn input thread: {e}")))
}

/// Send [`ControlEvent::Tick`] every `interval`
pub fn spawn_ticker(events: ControlEventSender, interval: Duration) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ticker".to_string())
        .spawn(move || {
            loop {
                thread::sleep(interval);
                if events.send(ControlEvent::Tick).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| PlayerError::Terminal(format!("failed to spawn ticker thread: {e}")))
}
