//! Terminal user interface
//!
//! - `status`: Status lines and the view that draws them
//! - `terminal`: Raw-mode guard restoring the terminal on drop

pub mod status;
pub mod terminal;

pub use status::{StatusSnapshot, StatusView, TerminalView};
pub use terminal::TerminalGuard;
