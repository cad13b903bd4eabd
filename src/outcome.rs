//! Append-only record of what happened to each file.
//!
//! Outcomes are written as JSON Lines: one object per line, never rewritten.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ErrorKind, IngestError, Stage},
    io_utils,
    reconcile::Decision,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Loaded,
    Skipped,
    Cancelled,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Loaded => "loaded",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Cancelled => "cancelled",
            OutcomeStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    /// SHA-256 of the file contents; absent for unreadable or unsupported files.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub file: FileIdentity,
    pub decision: Option<Decision>,
    pub status: OutcomeStatus,
    pub rows_loaded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl IngestionOutcome {
    pub fn loaded(run_id: Uuid, file: FileIdentity, decision: Decision, rows_loaded: usize) -> Self {
        Self::base(run_id, file, Some(decision), OutcomeStatus::Loaded).with_rows(rows_loaded)
    }

    pub fn skipped(run_id: Uuid, file: FileIdentity, reason: impl Into<String>) -> Self {
        let mut outcome = Self::base(run_id, file, None, OutcomeStatus::Skipped);
        outcome.reason = Some(reason.into());
        outcome
    }

    pub fn cancelled(run_id: Uuid, file: FileIdentity) -> Self {
        let mut outcome = Self::base(run_id, file, Some(Decision::Cancel), OutcomeStatus::Cancelled);
        outcome.reason = Some("cancelled by decision policy".to_string());
        outcome
    }

    pub fn failed(
        run_id: Uuid,
        file: FileIdentity,
        decision: Option<Decision>,
        err: &IngestError,
    ) -> Self {
        let mut outcome = Self::base(run_id, file, decision, OutcomeStatus::Failed);
        outcome.stage = Some(err.stage());
        outcome.error = Some(ErrorDetail {
            kind: err.kind(),
            message: err.to_string(),
        });
        outcome
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Loaded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|detail| detail.kind)
    }

    fn base(
        run_id: Uuid,
        file: FileIdentity,
        decision: Option<Decision>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            run_id,
            recorded_at: Utc::now(),
            file,
            decision,
            status,
            rows_loaded: 0,
            reason: None,
            stage: None,
            error: None,
        }
    }

    fn with_rows(mut self, rows_loaded: usize) -> Self {
        self.rows_loaded = rows_loaded;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub rows_loaded: usize,
}

impl OutcomeSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a IngestionOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Loaded => summary.loaded += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
                OutcomeStatus::Cancelled => summary.cancelled += 1,
                OutcomeStatus::Failed => summary.failed += 1,
            }
            summary.rows_loaded += outcome.rows_loaded;
        }
        summary
    }
}

/// Outcomes of one run, mirrored to a JSON Lines file when one is configured.
pub struct OutcomeLog {
    run_id: Uuid,
    path: Option<PathBuf>,
    writer: Option<File>,
    records: Vec<IngestionOutcome>,
}

impl OutcomeLog {
    /// Opens `path` for appending, creating it and its parent directory if needed.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let to_error = |source: io::Error| IngestError::OutcomeLog {
            path: path.to_path_buf(),
            source,
        };
        io_utils::ensure_parent_dir(path).map_err(to_error)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(to_error)?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            path: Some(path.to_path_buf()),
            writer: Some(file),
            records: Vec::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            path: None,
            writer: None,
            records: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&mut self, outcome: IngestionOutcome) -> Result<(), IngestError> {
        if let (Some(writer), Some(path)) = (self.writer.as_mut(), self.path.as_ref()) {
            let to_error = |source: io::Error| IngestError::OutcomeLog {
                path: path.clone(),
                source,
            };
            let line = serde_json::to_string(&outcome).map_err(|err| to_error(err.into()))?;
            writeln!(writer, "{line}").map_err(to_error)?;
            writer.flush().map_err(to_error)?;
        }
        self.records.push(outcome);
        Ok(())
    }

    pub fn records(&self) -> &[IngestionOutcome] {
        &self.records
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary::from_outcomes(&self.records)
    }
}

/// Reads every outcome ever appended to `path`.
pub fn read_log(path: &Path) -> Result<Vec<IngestionOutcome>> {
    let file = File::open(path).with_context(|| format!("Opening outcome log {path:?}"))?;
    let mut outcomes = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Reading outcome log {path:?}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = serde_json::from_str(&line)
            .with_context(|| format!("Parsing line {} of {path:?}", idx + 1))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
