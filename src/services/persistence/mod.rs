//! Persistence Service
//!
//! Coordinates the ephemeral, durable-local and durable-remote tiers.

mod coordinator;

pub use coordinator::{PersistenceCoordinator, RemoteWrite, ResolvedSnapshot, SnapshotSource};
