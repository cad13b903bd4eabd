//! Per-file pipeline: format check → fingerprint → decode → desired schema →
//! reconcile → load → record.
//!
//! A failing file never stops the files after it. The exceptions are failures
//! that would hit every remaining file the same way (the warehouse is
//! unreachable, the outcome log cannot be written): the failing file's outcome
//! is recorded and the error is handed back to the caller once.

use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::{
    config::IngestConfig,
    decode::{self, FileFormat},
    error::{IngestError, Stage},
    io_utils,
    outcome::{FileIdentity, IngestionOutcome, OutcomeLog, OutcomeSummary},
    reconcile::{Decision, DecisionPolicy, Reconciler},
    typed_table::TypedTable,
    warehouse::{JobState, QualifiedTableName, Warehouse, WarehouseError},
};

pub const UNSUPPORTED_FORMAT: &str = "unsupported format";

enum Attempt {
    Loaded { decision: Decision, rows: usize },
    Skipped { reason: String },
    Cancelled,
}

pub struct Orchestrator<'a, W: Warehouse + ?Sized> {
    config: IngestConfig,
    warehouse: &'a W,
    log: OutcomeLog,
}

impl<'a, W: Warehouse + ?Sized> Orchestrator<'a, W> {
    pub fn new(config: IngestConfig, warehouse: &'a W, log: OutcomeLog) -> Self {
        Self {
            config,
            warehouse,
            log,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn log(&self) -> &OutcomeLog {
        &self.log
    }

    /// Ingests every file found directly inside the configured data directory.
    pub fn run_directory(
        &mut self,
        policy: &mut dyn DecisionPolicy,
    ) -> Result<Vec<IngestionOutcome>, IngestError> {
        let dir = self.config.data_dir.clone();
        let files = io_utils::discover_files(&dir)
            .map_err(|source| IngestError::DataDirectory { path: dir, source })?;
        self.run_batch(&files, policy)
    }

    pub fn run_batch(
        &mut self,
        files: &[PathBuf],
        policy: &mut dyn DecisionPolicy,
    ) -> Result<Vec<IngestionOutcome>, IngestError> {
        info!(
            "Starting ingestion of {} file(s) into {} (run {})",
            files.len(),
            self.config.table,
            self.log.run_id()
        );
        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            outcomes.push(self.process_file(path, policy)?);
        }
        let summary = OutcomeSummary::from_outcomes(&outcomes);
        info!(
            "Ingestion finished: {} loaded ({} row(s)), {} skipped, {} cancelled, {} failed",
            summary.loaded, summary.rows_loaded, summary.skipped, summary.cancelled, summary.failed
        );
        Ok(outcomes)
    }

    /// Single-file mode, typically with a human answering the policy prompt.
    pub fn run_interactive(
        &mut self,
        path: &Path,
        policy: &mut dyn DecisionPolicy,
    ) -> Result<IngestionOutcome, IngestError> {
        self.process_file(path, policy)
    }

    fn process_file(
        &mut self,
        path: &Path,
        policy: &mut dyn DecisionPolicy,
    ) -> Result<IngestionOutcome, IngestError> {
        let supported = FileFormat::from_path(path).is_some();
        let fingerprint = if supported { fingerprint_of(path) } else { None };
        let file = FileIdentity {
            path: path.to_path_buf(),
            fingerprint,
        };
        let run_id = self.log.run_id();

        let mut decision = None;
        let result = if supported {
            self.attempt(path, policy, &mut decision)
        } else {
            warn!("Unsupported file type: {}", path.display());
            Ok(Attempt::Skipped {
                reason: UNSUPPORTED_FORMAT.to_string(),
            })
        };
        let outcome = match &result {
            Ok(Attempt::Loaded { decision, rows }) => {
                IngestionOutcome::loaded(run_id, file, *decision, *rows)
            }
            Ok(Attempt::Skipped { reason }) => IngestionOutcome::skipped(run_id, file, reason),
            Ok(Attempt::Cancelled) => IngestionOutcome::cancelled(run_id, file),
            Err(err) => {
                error!("Error processing file {}: {err}", path.display());
                IngestionOutcome::failed(run_id, file, decision, err)
            }
        };
        self.log.append(outcome.clone())?;

        if let Err(err) = result
            && err.is_fatal()
        {
            return Err(err);
        }
        Ok(outcome)
    }

    fn attempt(
        &self,
        path: &Path,
        policy: &mut dyn DecisionPolicy,
        decision: &mut Option<Decision>,
    ) -> Result<Attempt, IngestError> {
        let data = decode::decode_file(path, &self.config.input.decode).map_err(|source| {
            IngestError::Decode {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.reconcile_and_load(path, &data, policy, decision)
    }

    /// Runs the table lifecycle for an already decoded file.
    fn reconcile_and_load(
        &self,
        path: &Path,
        data: &TypedTable,
        policy: &mut dyn DecisionPolicy,
        decision: &mut Option<Decision>,
    ) -> Result<Attempt, IngestError> {
        let table = &self.config.table;
        // Checked before any warehouse call; the bootstrap schema is never empty.
        if data.column_count() == 0 {
            return Err(IngestError::EmptySchema {
                table: table.clone(),
            });
        }
        let desired = self.config.input.desired_schema(data);

        let reconciler = Reconciler::new(self.warehouse, self.config.dataset_location.as_str());
        let chosen = reconciler.decide(table, policy)?;
        *decision = Some(chosen);
        reconciler.apply(chosen, &desired, table)?;

        if chosen == Decision::Cancel {
            info!("Skipping load of {} into {table}: cancelled", path.display());
            return Ok(Attempt::Cancelled);
        }

        let rows = self.load(table, data)?;
        info!(
            "Loaded {rows} row(s) from {} into {table} ({chosen})",
            path.display()
        );
        Ok(Attempt::Loaded {
            decision: chosen,
            rows,
        })
    }

    /// Submits one bulk load and waits for it; a job still running at the
    /// deadline is not a success.
    fn load(&self, table: &QualifiedTableName, data: &TypedTable) -> Result<usize, IngestError> {
        let mut job = self
            .warehouse
            .load_table(table, data)
            .map_err(|source| load_error(table, source))?;
        let timeout = self.config.load_timeout;
        match job.wait(timeout).map_err(|source| load_error(table, source))? {
            JobState::Done { rows_loaded } => Ok(rows_loaded),
            JobState::Running => Err(IngestError::LoadIncomplete {
                table: table.clone(),
                job_id: job.job_id().to_string(),
                waited: timeout,
            }),
        }
    }
}

/// Unreadable files are still processed; they just go unfingerprinted.
fn fingerprint_of(path: &Path) -> Option<String> {
    match io_utils::file_fingerprint(path) {
        Ok(digest) => Some(digest),
        Err(err) => {
            warn!("Could not fingerprint {}: {err:#}", path.display());
            None
        }
    }
}

fn load_error(table: &QualifiedTableName, source: WarehouseError) -> IngestError {
    match source {
        WarehouseError::SchemaMismatch { conflicts, .. } => IngestError::SchemaMismatch {
            table: table.clone(),
            conflicts,
        },
        source => IngestError::Warehouse {
            stage: Stage::Load,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SchemaMode,
        error::ErrorKind,
        outcome::OutcomeStatus,
        reconcile::{ExistingTableAction, FixedPolicy},
        schema::{FieldSchema, FieldType, SchemaDescriptor},
        warehouse::InMemoryWarehouse,
    };
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn unsupported_and_undecodable_files_do_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        let broken = dir.path().join("broken.json");
        let people = dir.path().join("people.csv");
        fs::write(&notes, "hello").unwrap();
        fs::write(&broken, "{oops").unwrap();
        fs::write(&people, "id,name\n1,Ada\n").unwrap();

        let warehouse = InMemoryWarehouse::new();
        let config = IngestConfig::new(QualifiedTableName::new("p", "d", "t"));
        let mut orchestrator = Orchestrator::new(config, &warehouse, OutcomeLog::in_memory());
        let mut policy = FixedPolicy(ExistingTableAction::Append);
        let outcomes = orchestrator
            .run_batch(&[notes, broken, people], &mut policy)
            .unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(outcomes[0].reason.as_deref(), Some(UNSUPPORTED_FORMAT));
        assert_eq!(outcomes[1].error_kind(), Some(ErrorKind::Decode));
        assert_eq!(outcomes[1].stage, Some(Stage::Decode));
        assert!(outcomes[2].is_success());
        assert_eq!(outcomes[2].rows_loaded, 1);
        assert_eq!(orchestrator.log().records().len(), 3);
    }

    #[test]
    fn unsupported_files_are_not_fingerprinted() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("dump.tar");
        let people = dir.path().join("people.csv");
        fs::write(&archive, vec![0u8; 4096]).unwrap();
        fs::write(&people, "id,name\n1,Ada\n").unwrap();

        let warehouse = InMemoryWarehouse::new();
        let config = IngestConfig::new(QualifiedTableName::new("p", "d", "t"));
        let mut orchestrator = Orchestrator::new(config, &warehouse, OutcomeLog::in_memory());
        let outcomes = orchestrator
            .run_batch(&[archive, people], &mut FixedPolicy(ExistingTableAction::Append))
            .unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(outcomes[0].file.fingerprint, None);
        assert_eq!(outcomes[1].file.fingerprint.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn column_less_data_fails_before_the_table_is_touched() {
        let table = QualifiedTableName::new("p", "d", "t");
        let existing = SchemaDescriptor::new(vec![FieldSchema::nullable("id", FieldType::Integer)])
            .unwrap();
        let warehouse = InMemoryWarehouse::new().with_table(table.clone(), existing.clone());
        let mut config = IngestConfig::new(table.clone());
        config.input.schema_mode = SchemaMode::Bootstrap;
        let orchestrator = Orchestrator::new(config, &warehouse, OutcomeLog::in_memory());

        let empty = TypedTable::new(Vec::new(), Vec::new()).unwrap();
        let mut decision = None;
        let err = orchestrator
            .reconcile_and_load(
                Path::new("empty.parquet"),
                &empty,
                &mut FixedPolicy(ExistingTableAction::Recreate),
                &mut decision,
            )
            .err()
            .unwrap();

        assert!(matches!(err, IngestError::EmptySchema { .. }), "got {err}");
        assert_eq!(decision, None);
        assert!(warehouse.calls().is_empty());
        assert_eq!(warehouse.schema_of(&table), Some(existing));
    }

    #[test]
    fn load_errors_map_schema_conflicts_to_schema_mismatch() {
        let table = QualifiedTableName::new("p", "d", "t");
        let err = load_error(
            &table,
            WarehouseError::SchemaMismatch {
                table: table.to_string(),
                conflicts: Vec::new(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

        let err = load_error(&table, WarehouseError::Storage("quota".into()));
        assert_eq!(err.kind(), ErrorKind::Warehouse);
        assert_eq!(err.stage(), Stage::Load);
    }
}
