//! Backend Service
//!
//! Connectors that turn an analysis request into pipeline events and a
//! terminal result: the optimizer service over HTTP and the local
//! simulation used when the service is unreachable.

mod client;
mod connector;
mod simulation;
mod sse;

pub use client::{HttpBackend, HttpBackendConfig};
pub use connector::{BackendConnector, PipelineConnector, PipelineSink, TaggedEvent};
pub use simulation::LocalSimulation;
pub use sse::{parse_run_stream, parse_sse_line, RunStreamEvent};
