//! Storage Layer
//!
//! The three persistence tiers and the JSON config file:
//! ephemeral (in-process cache), durable-local (synchronous key/value) and
//! durable-remote (best-effort document store).

pub mod config;
pub mod ephemeral;
pub mod local;
pub mod local_sqlite;
pub mod remote;
pub mod remote_http;

pub use config::*;
pub use ephemeral::*;
pub use local::*;
pub use local_sqlite::*;
pub use remote::*;
pub use remote_http::*;
