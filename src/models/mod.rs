//! Data Models
//!
//! Session state and client configuration.

pub mod session;
pub mod settings;

pub use session::*;
pub use settings::*;
