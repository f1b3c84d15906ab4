//! Append-only JSONL audit log of pipeline outcomes.
//!
//! One line per processed chunk: the final artifact (if any), every critique
//! report and the terminal status. Each line is a complete JSON object so the
//! file can be streamed or tailed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use orchestration::{
    Artifact, CritiqueReport, LoopStatus, OrchestrationError, PipelineOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Accepted,
    Rejected,
    BudgetExhausted,
    Duplicate,
    /// No provider could serve the request; retry later.
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub scope_id: String,
    pub status: AuditStatus,
    /// Kept artifact; absent for rejected, duplicate and failed chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub reports: Vec<CritiqueReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_result(
        document_id: &str,
        chunk_index: usize,
        scope_id: &str,
        result: &Result<PipelineOutcome, OrchestrationError>,
    ) -> Self {
        let mut record = Self {
            document_id: document_id.to_string(),
            chunk_index,
            scope_id: scope_id.to_string(),
            status: AuditStatus::Error,
            artifact: None,
            reports: Vec::new(),
            duplicate_of: None,
            error: None,
            recorded_at: Utc::now(),
        };
        match result {
            Ok(PipelineOutcome::Duplicate(found)) => {
                record.status = AuditStatus::Duplicate;
                record.duplicate_of = Some(found.id);
            }
            Ok(PipelineOutcome::Completed(outcome)) => {
                record.status = match outcome.status {
                    LoopStatus::Accepted => AuditStatus::Accepted,
                    LoopStatus::Rejected => AuditStatus::Rejected,
                    LoopStatus::BudgetExhausted => AuditStatus::BudgetExhausted,
                };
                if outcome.is_accepted() {
                    record.artifact = Some(outcome.artifact.clone());
                }
                record.reports = outcome.reports.clone();
            }
            Err(err) => {
                record.status = if err.is_retry_later() {
                    AuditStatus::Unavailable
                } else {
                    AuditStatus::Error
                };
                record.reports = err.partial_reports().to_vec();
                record.error = Some(err.to_string());
            }
        }
        record
    }
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self, WorkerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| WorkerError::Audit {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| WorkerError::Audit {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "audit log opened");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), WorkerError> {
        let line = serde_json::to_string(record).map_err(|e| WorkerError::Audit {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{line}").map_err(|source| WorkerError::Audit {
            path: self.path.clone(),
            source,
        })
    }

    /// Parse every record in an audit file.
    pub fn read_all(path: &Path) -> Result<Vec<AuditRecord>, WorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| WorkerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l).map_err(|e| WorkerError::Audit {
                    path: path.to_path_buf(),
                    source: std::io::Error::other(e),
                })
            })
            .collect()
    }
}
