//! In-process warehouse used by the test-suite and by dry runs.
//!
//! Every call is logged, failures can be queued per operation, and loads can be
//! held so jobs never finish. Datasets and tables can also be changed
//! "externally" to simulate another actor racing the reconciler.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::debug;

use super::{
    CompletedJob, DatasetRef, JobState, LoadJob, QualifiedTableName, Warehouse, WarehouseError,
    align_rows,
};
use crate::{
    schema::SchemaDescriptor,
    typed_table::{Row, TypedTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DatasetExists,
    CreateDataset,
    TableExists,
    TableSchema,
    CreateTable,
    DeleteTable,
    LoadTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseCall {
    DatasetExists(DatasetRef),
    CreateDataset {
        dataset: DatasetRef,
        location: String,
    },
    TableExists(QualifiedTableName),
    TableSchema(QualifiedTableName),
    CreateTable {
        table: QualifiedTableName,
        schema: SchemaDescriptor,
    },
    DeleteTable(QualifiedTableName),
    LoadTable {
        table: QualifiedTableName,
        rows: usize,
    },
}

impl WarehouseCall {
    pub fn operation(&self) -> Operation {
        match self {
            WarehouseCall::DatasetExists(_) => Operation::DatasetExists,
            WarehouseCall::CreateDataset { .. } => Operation::CreateDataset,
            WarehouseCall::TableExists(_) => Operation::TableExists,
            WarehouseCall::TableSchema(_) => Operation::TableSchema,
            WarehouseCall::CreateTable { .. } => Operation::CreateTable,
            WarehouseCall::DeleteTable(_) => Operation::DeleteTable,
            WarehouseCall::LoadTable { .. } => Operation::LoadTable,
        }
    }

    /// Table-level create, delete, or load.
    pub fn is_table_mutation(&self) -> bool {
        matches!(
            self.operation(),
            Operation::CreateTable | Operation::DeleteTable | Operation::LoadTable
        )
    }
}

#[derive(Debug, Clone)]
struct StoredTable {
    schema: SchemaDescriptor,
    rows: Vec<Row>,
}

#[derive(Default)]
struct State {
    datasets: HashMap<DatasetRef, String>,
    tables: HashMap<QualifiedTableName, StoredTable>,
    calls: Vec<WarehouseCall>,
    faults: HashMap<Operation, VecDeque<WarehouseError>>,
    hold_loads: bool,
    dataset_race: Option<String>,
    jobs_submitted: usize,
}

impl State {
    /// Logs the call and hands back a queued failure for it, if any.
    fn enter(&mut self, call: WarehouseCall) -> Result<(), WarehouseError> {
        let operation = call.operation();
        self.calls.push(call);
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!("Injected failure for {operation:?}: {err}");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryWarehouse {
    state: Mutex<State>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, dataset: DatasetRef, location: &str) -> Self {
        self.lock().datasets.insert(dataset, location.to_string());
        self
    }

    /// Seeds an existing table (and its dataset) without logging any calls.
    pub fn with_table(self, table: QualifiedTableName, schema: SchemaDescriptor) -> Self {
        {
            let mut state = self.lock();
            state
                .datasets
                .entry(table.dataset_ref())
                .or_insert_with(|| "US".to_string());
            state.tables.insert(
                table,
                StoredTable {
                    schema,
                    rows: Vec::new(),
                },
            );
        }
        self
    }

    /// Queues `err` as the result of the next call to `operation`.
    pub fn fail_next(&self, operation: Operation, err: WarehouseError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    /// The next `create_dataset` loses a race: another actor creates the
    /// dataset in `location` just before it.
    pub fn race_next_dataset_creation(&self, location: &str) {
        self.lock().dataset_race = Some(location.to_string());
    }

    /// Subsequent load jobs are accepted but never finish.
    pub fn hold_loads(&self) {
        self.lock().hold_loads = true;
    }

    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.lock().calls.clone()
    }

    pub fn table_mutations(&self) -> Vec<WarehouseCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_table_mutation())
            .cloned()
            .collect()
    }

    pub fn dataset_location(&self, dataset: &DatasetRef) -> Option<String> {
        self.lock().datasets.get(dataset).cloned()
    }

    pub fn schema_of(&self, table: &QualifiedTableName) -> Option<SchemaDescriptor> {
        self.lock().tables.get(table).map(|t| t.schema.clone())
    }

    pub fn rows_in(&self, table: &QualifiedTableName) -> Option<Vec<Row>> {
        self.lock().tables.get(table).map(|t| t.rows.clone())
    }

    pub fn drop_table_externally(&self, table: &QualifiedTableName) {
        self.lock().tables.remove(table);
    }

    pub fn create_table_externally(&self, table: QualifiedTableName, schema: SchemaDescriptor) {
        self.lock().tables.insert(
            table,
            StoredTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Warehouse for InMemoryWarehouse {
    fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::DatasetExists(dataset.clone()))?;
        Ok(state.datasets.contains_key(dataset))
    }

    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> Result<(), WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::CreateDataset {
            dataset: dataset.clone(),
            location: location.to_string(),
        })?;
        if let Some(winner) = state.dataset_race.take() {
            state.datasets.entry(dataset.clone()).or_insert(winner);
        }
        if state.datasets.contains_key(dataset) {
            return Err(WarehouseError::AlreadyExists {
                resource: format!("dataset {dataset}"),
            });
        }
        state.datasets.insert(dataset.clone(), location.to_string());
        Ok(())
    }

    fn table_exists(&self, table: &QualifiedTableName) -> Result<bool, WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::TableExists(table.clone()))?;
        Ok(state.tables.contains_key(table))
    }

    fn table_schema(&self, table: &QualifiedTableName) -> Result<SchemaDescriptor, WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::TableSchema(table.clone()))?;
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| WarehouseError::NotFound {
                resource: format!("table {table}"),
            })
    }

    fn create_table(
        &self,
        table: &QualifiedTableName,
        schema: &SchemaDescriptor,
    ) -> Result<(), WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::CreateTable {
            table: table.clone(),
            schema: schema.clone(),
        })?;
        if !state.datasets.contains_key(&table.dataset_ref()) {
            return Err(WarehouseError::NotFound {
                resource: format!("dataset {}", table.dataset_ref()),
            });
        }
        if state.tables.contains_key(table) {
            return Err(WarehouseError::AlreadyExists {
                resource: format!("table {table}"),
            });
        }
        state.tables.insert(
            table.clone(),
            StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_table(&self, table: &QualifiedTableName) -> Result<(), WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::DeleteTable(table.clone()))?;
        state
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| WarehouseError::NotFound {
                resource: format!("table {table}"),
            })
    }

    fn load_table(
        &self,
        table: &QualifiedTableName,
        data: &TypedTable,
    ) -> Result<Box<dyn LoadJob>, WarehouseError> {
        let mut state = self.lock();
        state.enter(WarehouseCall::LoadTable {
            table: table.clone(),
            rows: data.row_count(),
        })?;
        state.jobs_submitted += 1;
        let job_id = format!("memory-job-{}", state.jobs_submitted);
        let hold = state.hold_loads;

        let stored = state
            .tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::NotFound {
                resource: format!("table {table}"),
            })?;
        let conflicts = stored.schema.load_conflicts(data);
        if !conflicts.is_empty() {
            return Err(WarehouseError::SchemaMismatch {
                table: table.to_string(),
                conflicts,
            });
        }
        if hold {
            return Ok(Box::new(HeldJob { job_id }));
        }
        let aligned = align_rows(&stored.schema, data);
        stored.rows.extend(aligned);
        Ok(Box::new(CompletedJob::new(job_id, data.row_count())))
    }
}

/// A job that stays running no matter how long the caller waits.
struct HeldJob {
    job_id: String,
}

impl LoadJob for HeldJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn wait(&mut self, _timeout: Duration) -> Result<JobState, WarehouseError> {
        Ok(JobState::Running)
    }
}
