//! SQL Optimizer Session Client
//!
//! Orchestration core of the SQL optimizer client. It includes:
//! - The session state machine (`SessionController`)
//! - Backend connectors (optimizer service over HTTP, local simulation)
//! - Three-tier persistence (ephemeral, durable-local, durable-remote)
//! - Client configuration, logging setup and utilities
//!
//! The pure data model lives in `sqlopt-core` and is re-exported here.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::session::{Baseline, Session, SessionEvent, SessionMode};
pub use models::settings::{ClientConfig, ConfigUpdate};
pub use services::{PersistenceCoordinator, RunOutcome, SessionController};
pub use utils::error::{AppError, AppResult};

pub use sqlopt_core;
