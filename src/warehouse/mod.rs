//! Warehouse collaborator: naming, errors, and the [`Warehouse`] trait.
//!
//! Existence is always queried explicitly (`dataset_exists`, `table_exists`)
//! and answered with a boolean; "not found" errors only appear when a mutation
//! targets something that vanished between the check and the call.

pub mod local;
pub mod memory;

use std::{fmt, io, path::PathBuf, str::FromStr, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    schema::{SchemaConflict, SchemaDescriptor},
    typed_table::{Row, TypedTable},
};

pub use local::LocalWarehouse;
pub use memory::InMemoryWarehouse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableNameError {
    #[error("table name '{0}' must have the form project.dataset.table")]
    Malformed(String),
}

/// `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedTableName {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl QualifiedTableName {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
        }
    }
}

impl FromStr for QualifiedTableName {
    type Err = TableNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split('.').map(str::trim).collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(QualifiedTableName::new(*project, *dataset, *table))
            }
            _ => Err(TableNameError::Malformed(value.to_string())),
        }
    }
}

impl TryFrom<String> for QualifiedTableName {
    type Error = TableNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualifiedTableName> for String {
    fn from(value: QualifiedTableName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for QualifiedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },
    #[error("{resource} was not found")]
    NotFound { resource: String },
    #[error("load into {table} rejected: {}", .conflicts.iter().join("; "))]
    SchemaMismatch {
        table: String,
        conflicts: Vec<SchemaConflict>,
    },
    /// The backend cannot be reached at all (missing credentials, unusable root).
    #[error("warehouse unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("warehouse storage error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("warehouse storage error: {0}")]
    Storage(String),
}

impl WarehouseError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, WarehouseError::AlreadyExists { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WarehouseError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Done { rows_loaded: usize },
    Running,
}

/// A submitted bulk load.
pub trait LoadJob: Send {
    fn job_id(&self) -> &str;

    /// Blocks for at most `timeout` and reports where the job stands.
    fn wait(&mut self, timeout: Duration) -> Result<JobState, WarehouseError>;
}

/// A job that finished during submission.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    job_id: String,
    rows_loaded: usize,
}

impl CompletedJob {
    pub fn new(job_id: impl Into<String>, rows_loaded: usize) -> Self {
        Self {
            job_id: job_id.into(),
            rows_loaded,
        }
    }
}

impl LoadJob for CompletedJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn wait(&mut self, _timeout: Duration) -> Result<JobState, WarehouseError> {
        Ok(JobState::Done {
            rows_loaded: self.rows_loaded,
        })
    }
}

pub trait Warehouse: Send + Sync {
    fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError>;

    /// Fails with [`WarehouseError::AlreadyExists`] when another actor got there first.
    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> Result<(), WarehouseError>;

    fn table_exists(&self, table: &QualifiedTableName) -> Result<bool, WarehouseError>;

    fn table_schema(&self, table: &QualifiedTableName) -> Result<SchemaDescriptor, WarehouseError>;

    fn create_table(
        &self,
        table: &QualifiedTableName,
        schema: &SchemaDescriptor,
    ) -> Result<(), WarehouseError>;

    fn delete_table(&self, table: &QualifiedTableName) -> Result<(), WarehouseError>;

    /// Submits `data` for appending to `table`. Rows are matched to fields by name.
    fn load_table(
        &self,
        table: &QualifiedTableName,
        data: &TypedTable,
    ) -> Result<Box<dyn LoadJob>, WarehouseError>;
}

/// Reorders `data` into `schema` field order, leaving absent columns null.
/// Callers check [`SchemaDescriptor::load_conflicts`] first.
pub(crate) fn align_rows(schema: &SchemaDescriptor, data: &TypedTable) -> Vec<Row> {
    let positions: Vec<Option<usize>> = schema
        .fields()
        .iter()
        .map(|field| data.column_index(&field.name))
        .collect();
    data.rows()
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|pos| pos.and_then(|idx| row[idx].clone()))
                .collect()
        })
        .collect()
}
