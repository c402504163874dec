//! Control loop
//!
//! - `events`: `ControlEvent` producers (terminal input and the one-second tick)
//! - `session`: Session state machine applying key actions to the playback graph

pub mod events;
pub mod session;

pub use events::{control_channel, spawn_input_poller, spawn_ticker};
pub use session::{ControlSteps, Session, SessionPhase, load_track};
