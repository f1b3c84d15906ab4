//! Sequential background worker.
//!
//! ```text
//! submit(job) ──► [bounded mpsc] ──► worker task
//!                                     for chunk in job.prompts (in order)
//!                                       pipeline.request_artifact
//!                                       audit.append
//!                                       results.send ──► caller
//! ```
//!
//! One document at a time and one chunk at a time: ordering within a
//! document is preserved so citations always validate against a stable
//! source. Cancellation stops the worker between chunks and interrupts the
//! chunk in flight.

use std::sync::Arc;

use orchestration::{ArtifactRequest, InsightPipeline, LoopStatus, OrchestrationError, PipelineOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditLog, AuditRecord};

/// One document and the extraction prompts to run over it, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentJob {
    pub document_id: String,
    pub scope_id: String,
    pub source_text: String,
    pub prompts: Vec<String>,
}

/// Result for one prompt of one document.
#[derive(Debug)]
pub struct ChunkResult {
    pub document_id: String,
    pub chunk_index: usize,
    pub scope_id: String,
    pub outcome: Result<PipelineOutcome, OrchestrationError>,
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub documents: usize,
    pub chunks: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub budget_exhausted: usize,
    pub duplicates: usize,
    pub unavailable: usize,
    pub errors: usize,
    pub cancelled: bool,
}

impl WorkerSummary {
    fn record(&mut self, outcome: &Result<PipelineOutcome, OrchestrationError>) {
        self.chunks += 1;
        match outcome {
            Ok(PipelineOutcome::Duplicate(_)) => self.duplicates += 1,
            Ok(PipelineOutcome::Completed(done)) => match done.status {
                LoopStatus::Accepted => self.accepted += 1,
                LoopStatus::Rejected => self.rejected += 1,
                LoopStatus::BudgetExhausted => self.budget_exhausted += 1,
            },
            Err(e) if e.is_retry_later() => self.unavailable += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Sender side of the job queue.
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<DocumentJob>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Queue a job; waits while the queue is full.
    pub async fn submit(&self, job: DocumentJob) -> Result<(), OrchestrationError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| OrchestrationError::Cancelled("worker stopped".to_string()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct Worker {
    pipeline: Arc<InsightPipeline>,
    audit: Option<Arc<AuditLog>>,
}

impl Worker {
    pub fn new(pipeline: Arc<InsightPipeline>) -> Self {
        Self {
            pipeline,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Start the worker task. Dropping every [`WorkerHandle`] drains the
    /// queue and stops; cancelling stops after the current chunk.
    pub fn spawn(
        self,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (WorkerHandle, mpsc::Receiver<ChunkResult>, JoinHandle<WorkerSummary>) {
        let (job_tx, job_rx) = mpsc::channel(queue_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel(queue_capacity.max(1));
        let handle = WorkerHandle {
            jobs: job_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(self.run(job_rx, result_tx, cancel));
        (handle, result_rx, task)
    }

    async fn run(
        self,
        mut jobs: mpsc::Receiver<DocumentJob>,
        results: mpsc::Sender<ChunkResult>,
        cancel: CancellationToken,
    ) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!("worker started");

        'jobs: loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = jobs.recv() => match next {
                    Some(job) => job,
                    None => break,
                },
            };
            summary.documents += 1;
            info!(document = %job.document_id, chunks = job.prompts.len(), "processing document");

            for (chunk_index, prompt) in job.prompts.iter().enumerate() {
                if cancel.is_cancelled() {
                    break 'jobs;
                }
                let request = ArtifactRequest::new(prompt.as_str(), job.source_text.as_str(), job.scope_id.as_str());
                let outcome = self.pipeline.request_artifact_with_cancel(&request, &cancel).await;
                if matches!(&outcome, Err(e) if e.is_cancelled()) {
                    break 'jobs;
                }

                summary.record(&outcome);
                if let Some(audit) = &self.audit {
                    let record = AuditRecord::from_result(&job.document_id, chunk_index, &job.scope_id, &outcome);
                    if let Err(e) = audit.append(&record) {
                        warn!(error = %e, "failed to append audit record");
                    }
                }
                let result = ChunkResult {
                    document_id: job.document_id.clone(),
                    chunk_index,
                    scope_id: job.scope_id.clone(),
                    outcome,
                };
                if results.send(result).await.is_err() {
                    warn!("result receiver dropped, stopping worker");
                    break 'jobs;
                }
            }
        }

        summary.cancelled = cancel.is_cancelled();
        info!(
            documents = summary.documents,
            chunks = summary.chunks,
            accepted = summary.accepted,
            cancelled = summary.cancelled,
            "worker stopped"
        );
        summary
    }
}
