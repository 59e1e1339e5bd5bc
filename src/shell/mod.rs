//! Presentation shells
//!
//! Two entry surfaces over the same session worker: a terminal prompt
//! loop and a windowed GUI. Both talk to the orchestrator exclusively
//! through the typed command/event channels.

pub mod gui;
pub mod terminal;
