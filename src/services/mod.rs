//! Services
//!
//! Business logic of the session client. The session controller drives
//! the backend connector and hands completed runs to the persistence
//! coordinator.

pub mod backend;
pub mod persistence;
pub mod session;

pub use backend::{
    BackendConnector, HttpBackend, HttpBackendConfig, LocalSimulation, PipelineConnector,
    PipelineSink,
};
pub use persistence::{PersistenceCoordinator, RemoteWrite, ResolvedSnapshot, SnapshotSource};
pub use session::{DraftScheduler, RunOutcome, SessionController};
