//! Session Service
//!
//! The session state machine and its debounced draft writer.

mod controller;
mod draft;

pub use controller::{RunOutcome, SessionController};
pub use draft::DraftScheduler;
