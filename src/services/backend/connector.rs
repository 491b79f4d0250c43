//! Backend Connector
//!
//! The seam between the session controller and whatever produces analysis
//! results. A run reports progress and stage completions through a
//! `PipelineSink` and ends with one terminal `AnalysisResult`; transport and
//! service failures come back as error-shaped results, never as `Err`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlopt_core::{
    AnalysisRequest, AnalysisResult, ErrorKind, PipelineEvent, RunTicket, StageName, StageResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::simulation::LocalSimulation;

/// An event tagged with the run that produced it
pub type TaggedEvent = (RunTicket, PipelineEvent);

/// Producer of analysis results.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Bounded reachability check. A timeout counts as unreachable.
    async fn probe(&self) -> bool;

    /// Execute one analysis attempt, reporting events through `sink`.
    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult;
}

/// Event channel handed to one run.
///
/// Every event is tagged with the run's ticket so the consumer can drop
/// events from runs it no longer tracks. Sends after the consumer went away
/// are discarded.
#[derive(Debug, Clone)]
pub struct PipelineSink {
    ticket: RunTicket,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    cancel: CancellationToken,
}

impl PipelineSink {
    pub fn new(
        ticket: RunTicket,
        tx: mpsc::UnboundedSender<TaggedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self { ticket, tx, cancel }
    }

    /// Sink with its own channel; returns the receiving half.
    pub fn channel(ticket: RunTicket) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ticket, tx, CancellationToken::new()), rx)
    }

    pub fn ticket(&self) -> &RunTicket {
        &self.ticket
    }

    pub fn progress(&self, stage: StageName) {
        self.emit(PipelineEvent::progress(stage));
    }

    pub fn stage_complete(&self, stage: StageName, result: StageResult) {
        self.emit(PipelineEvent::stage_complete(stage, result));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run has been abandoned by its consumer.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn emit(&self, event: PipelineEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A closed channel only means nobody is listening any more.
        let _ = self.tx.send((self.ticket.clone(), event));
    }
}

/// Connector that probes the service before each run and falls back to the
/// local simulation when it is unreachable.
pub struct PipelineConnector {
    service: Arc<dyn BackendConnector>,
    simulation: Option<LocalSimulation>,
}

impl PipelineConnector {
    pub fn new(service: Arc<dyn BackendConnector>, simulation: Option<LocalSimulation>) -> Self {
        Self {
            service,
            simulation,
        }
    }
}

#[async_trait]
impl BackendConnector for PipelineConnector {
    async fn probe(&self) -> bool {
        self.service.probe().await
    }

    async fn run(&self, request: &AnalysisRequest, sink: &PipelineSink) -> AnalysisResult {
        if self.service.probe().await {
            info!(
                session_id = %sink.ticket().session_id,
                generation = sink.ticket().generation,
                "Running analysis on optimizer service"
            );
            return self.service.run(request, sink).await;
        }

        match &self.simulation {
            Some(simulation) => {
                warn!(
                    session_id = %sink.ticket().session_id,
                    "Optimizer service unreachable; running local simulation"
                );
                simulation.run(request, sink).await
            }
            None => {
                warn!(
                    session_id = %sink.ticket().session_id,
                    "Optimizer service unreachable and simulation disabled"
                );
                AnalysisResult::failure(
                    ErrorKind::BackendUnavailable,
                    "The optimizer service is not reachable",
                )
            }
        }
    }
}
