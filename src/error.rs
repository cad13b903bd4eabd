//! Per-file failure taxonomy of an ingestion run.

use std::{fmt, io, path::PathBuf, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    decode::DecodeError,
    schema::SchemaConflict,
    warehouse::{DatasetRef, QualifiedTableName, WarehouseError},
};

/// Where in a file's attempt something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decode,
    Reconcile,
    Load,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Decode => "decode",
            Stage::Reconcile => "reconcile",
            Stage::Load => "load",
            Stage::Record => "record",
        })
    }
}

/// Stable, serializable name of an [`IngestError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    DatasetUnavailable,
    TableCreate,
    TableDelete,
    TableLost,
    EmptySchema,
    SchemaMismatch,
    LoadIncomplete,
    Warehouse,
    OutcomeLog,
    DataDirectory,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("dataset {dataset} is unavailable: {source}")]
    DatasetUnavailable {
        dataset: DatasetRef,
        #[source]
        source: WarehouseError,
    },
    #[error("creating table {table} failed: {source}")]
    TableCreate {
        table: QualifiedTableName,
        #[source]
        source: WarehouseError,
    },
    #[error("deleting table {table} failed: {source}")]
    TableDelete {
        table: QualifiedTableName,
        #[source]
        source: WarehouseError,
    },
    #[error("table {table} was deleted for recreation but could not be created again: {source}")]
    TableLost {
        table: QualifiedTableName,
        #[source]
        source: WarehouseError,
    },
    #[error("refusing to create table {table} with no columns")]
    EmptySchema { table: QualifiedTableName },
    #[error("table {table} rejected the load: {}", .conflicts.iter().join("; "))]
    SchemaMismatch {
        table: QualifiedTableName,
        conflicts: Vec<SchemaConflict>,
    },
    #[error("load job {job_id} into {table} did not finish within {}s", .waited.as_secs())]
    LoadIncomplete {
        table: QualifiedTableName,
        job_id: String,
        waited: Duration,
    },
    #[error("warehouse call failed during {stage}: {source}")]
    Warehouse {
        stage: Stage,
        #[source]
        source: WarehouseError,
    },
    #[error("cannot append to outcome log {}: {source}", .path.display())]
    OutcomeLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot list data directory {}: {source}", .path.display())]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Decode { .. } => ErrorKind::Decode,
            IngestError::DatasetUnavailable { .. } => ErrorKind::DatasetUnavailable,
            IngestError::TableCreate { .. } => ErrorKind::TableCreate,
            IngestError::TableDelete { .. } => ErrorKind::TableDelete,
            IngestError::TableLost { .. } => ErrorKind::TableLost,
            IngestError::EmptySchema { .. } => ErrorKind::EmptySchema,
            IngestError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            IngestError::LoadIncomplete { .. } => ErrorKind::LoadIncomplete,
            IngestError::Warehouse { .. } => ErrorKind::Warehouse,
            IngestError::OutcomeLog { .. } => ErrorKind::OutcomeLog,
            IngestError::DataDirectory { .. } => ErrorKind::DataDirectory,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            IngestError::Decode { .. } | IngestError::DataDirectory { .. } => Stage::Decode,
            IngestError::DatasetUnavailable { .. }
            | IngestError::TableCreate { .. }
            | IngestError::TableDelete { .. }
            | IngestError::TableLost { .. }
            | IngestError::EmptySchema { .. } => Stage::Reconcile,
            IngestError::SchemaMismatch { .. } | IngestError::LoadIncomplete { .. } => Stage::Load,
            IngestError::Warehouse { stage, .. } => *stage,
            IngestError::OutcomeLog { .. } => Stage::Record,
        }
    }

    /// True when the whole run must stop rather than move on to the next file.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::OutcomeLog { .. } | IngestError::DataDirectory { .. } => true,
            IngestError::DatasetUnavailable { source, .. }
            | IngestError::TableCreate { source, .. }
            | IngestError::TableDelete { source, .. }
            | IngestError::TableLost { source, .. }
            | IngestError::Warehouse { source, .. } => {
                matches!(source, WarehouseError::Unavailable { .. })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> QualifiedTableName {
        QualifiedTableName::new("p", "d", "t")
    }

    #[test]
    fn kinds_and_stages_follow_the_variant() {
        let lost = IngestError::TableLost {
            table: table(),
            source: WarehouseError::Storage("disk full".into()),
        };
        assert_eq!(lost.kind(), ErrorKind::TableLost);
        assert_eq!(lost.stage(), Stage::Reconcile);
        assert!(lost.to_string().contains("could not be created again"));

        let waited = IngestError::LoadIncomplete {
            table: table(),
            job_id: "job-9".into(),
            waited: Duration::from_secs(300),
        };
        assert_eq!(waited.stage(), Stage::Load);
        assert!(waited.to_string().contains("within 300s"));
    }

    #[test]
    fn only_unavailable_backends_are_fatal() {
        let unavailable = IngestError::Warehouse {
            stage: Stage::Reconcile,
            source: WarehouseError::Unavailable {
                reason: "no credentials".into(),
            },
        };
        assert!(unavailable.is_fatal());

        let rejected = IngestError::Warehouse {
            stage: Stage::Load,
            source: WarehouseError::Storage("quota".into()),
        };
        assert!(!rejected.is_fatal());
        assert!(!IngestError::EmptySchema { table: table() }.is_fatal());
    }

    #[test]
    fn error_kinds_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::SchemaMismatch).unwrap(),
            "\"schema_mismatch\""
        );
    }
}
