//! Directory-backed warehouse so the CLI runs end-to-end without a cloud account.
//!
//! ```text
//! <root>/<project>/<dataset>/dataset.yml
//! <root>/<project>/<dataset>/<table>/schema.yml
//! <root>/<project>/<dataset>/<table>/rows.csv
//! ```
//!
//! Datasets and tables are built under a hidden staging name and renamed into
//! place, so a directory is either absent or complete. Two processes racing to
//! create the same one see one success and one `AlreadyExists`. Deletes rename
//! the table aside before removing it, and a load appends all of its rows or
//! none of them.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    CompletedJob, DatasetRef, LoadJob, QualifiedTableName, Warehouse, WarehouseError, align_rows,
};
use crate::{io_utils, schema::SchemaDescriptor, typed_table::TypedTable};

const DATASET_FILE: &str = "dataset.yml";
const SCHEMA_FILE: &str = "schema.yml";
const ROWS_FILE: &str = "rows.csv";

#[derive(Debug, Serialize, Deserialize)]
struct DatasetMeta {
    location: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: PathBuf,
}

impl LocalWarehouse {
    /// Opens (creating if needed) the warehouse rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| WarehouseError::Unavailable {
            reason: format!("cannot use {} as warehouse root: {err}", root.display()),
        })?;
        if !root.is_dir() {
            return Err(WarehouseError::Unavailable {
                reason: format!("{} is not a directory", root.display()),
            });
        }
        debug!("Local warehouse opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of rows stored in `table`.
    pub fn row_count(&self, table: &QualifiedTableName) -> Result<usize, WarehouseError> {
        let path = self.table_dir(table).join(ROWS_FILE);
        if !path.is_file() {
            return Err(not_found_table(table));
        }
        let mut reader = io_utils::open_csv_reader_from_path(
            &path,
            io_utils::DEFAULT_CSV_DELIMITER,
            false,
        )
        .map_err(|err| WarehouseError::io(&path, err))?;
        let mut record = csv::ByteRecord::new();
        let mut count = 0;
        while reader
            .read_byte_record(&mut record)
            .map_err(|err| WarehouseError::Storage(format!("reading {}: {err}", path.display())))?
        {
            count += 1;
        }
        Ok(count)
    }

    fn dataset_dir(&self, dataset: &DatasetRef) -> PathBuf {
        self.root.join(&dataset.project).join(&dataset.dataset)
    }

    fn table_dir(&self, table: &QualifiedTableName) -> PathBuf {
        self.dataset_dir(&table.dataset_ref()).join(&table.table)
    }
}

fn not_found_table(table: &QualifiedTableName) -> WarehouseError {
    WarehouseError::NotFound {
        resource: format!("table {table}"),
    }
}

/// Hidden sibling of `target`. The dot in the name keeps it apart from any
/// valid project, dataset or table name.
fn sibling(target: &Path, purpose: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{purpose}-{}", Uuid::new_v4().simple()))
}

fn remove_scratch(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        warn!("Could not remove {}: {err}", path.display());
    }
}

/// Moves `target` aside in one rename, then removes it.
fn discard_dir(target: &Path) -> io::Result<()> {
    let trash = sibling(target, "deleted");
    fs::rename(target, &trash)?;
    remove_scratch(&trash);
    Ok(())
}

/// Fills a staging directory and renames it onto `target`, so `target` is
/// either absent or complete. A `target` without its `marker` file is a
/// leftover and is discarded first.
fn publish_dir(
    target: &Path,
    marker: &str,
    resource: String,
    fill: impl FnOnce(&Path) -> Result<(), WarehouseError>,
) -> Result<(), WarehouseError> {
    if target.join(marker).is_file() {
        return Err(WarehouseError::AlreadyExists { resource });
    }
    if target.exists() {
        warn!("Discarding incomplete {resource} at {}", target.display());
        match discard_dir(target) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(WarehouseError::io(target, err)),
        }
    }

    let staging = sibling(target, "staging");
    fs::create_dir(&staging).map_err(|err| WarehouseError::io(&staging, err))?;
    if let Err(err) = fill(&staging) {
        remove_scratch(&staging);
        return Err(err);
    }
    match fs::rename(&staging, target) {
        Ok(()) => Ok(()),
        Err(err) => {
            remove_scratch(&staging);
            if target.join(marker).is_file() {
                Err(WarehouseError::AlreadyExists { resource })
            } else {
                Err(WarehouseError::io(target, err))
            }
        }
    }
}

impl Warehouse for LocalWarehouse {
    fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, WarehouseError> {
        Ok(self.dataset_dir(dataset).join(DATASET_FILE).is_file())
    }

    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> Result<(), WarehouseError> {
        let project_dir = self.root.join(&dataset.project);
        fs::create_dir_all(&project_dir).map_err(|err| WarehouseError::io(&project_dir, err))?;

        let meta = DatasetMeta {
            location: location.to_string(),
            created_at: Utc::now(),
        };
        publish_dir(
            &self.dataset_dir(dataset),
            DATASET_FILE,
            format!("dataset {dataset}"),
            |staging| {
                let path = staging.join(DATASET_FILE);
                let file = File::create(&path).map_err(|err| WarehouseError::io(&path, err))?;
                serde_yaml::to_writer(file, &meta).map_err(|err| {
                    WarehouseError::Storage(format!("writing {}: {err}", path.display()))
                })
            },
        )?;
        info!("Created dataset {dataset} in {location}");
        Ok(())
    }

    fn table_exists(&self, table: &QualifiedTableName) -> Result<bool, WarehouseError> {
        Ok(self.table_dir(table).join(SCHEMA_FILE).is_file())
    }

    fn table_schema(&self, table: &QualifiedTableName) -> Result<SchemaDescriptor, WarehouseError> {
        let path = self.table_dir(table).join(SCHEMA_FILE);
        if !path.is_file() {
            return Err(not_found_table(table));
        }
        SchemaDescriptor::load(&path).map_err(|err| WarehouseError::Storage(format!("{err:#}")))
    }

    fn create_table(
        &self,
        table: &QualifiedTableName,
        schema: &SchemaDescriptor,
    ) -> Result<(), WarehouseError> {
        let dataset = table.dataset_ref();
        if !self.dataset_exists(&dataset)? {
            return Err(WarehouseError::NotFound {
                resource: format!("dataset {dataset}"),
            });
        }
        publish_dir(
            &self.table_dir(table),
            SCHEMA_FILE,
            format!("table {table}"),
            |staging| {
                let rows_path = staging.join(ROWS_FILE);
                File::create(&rows_path).map_err(|err| WarehouseError::io(&rows_path, err))?;
                schema
                    .save(&staging.join(SCHEMA_FILE))
                    .map_err(|err| WarehouseError::Storage(format!("{err:#}")))
            },
        )
    }

    fn delete_table(&self, table: &QualifiedTableName) -> Result<(), WarehouseError> {
        if !self.table_exists(table)? {
            return Err(not_found_table(table));
        }
        let dir = self.table_dir(table);
        discard_dir(&dir).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => not_found_table(table),
            _ => WarehouseError::io(&dir, err),
        })
    }

    fn load_table(
        &self,
        table: &QualifiedTableName,
        data: &TypedTable,
    ) -> Result<Box<dyn LoadJob>, WarehouseError> {
        let schema = self.table_schema(table)?;
        let conflicts = schema.load_conflicts(data);
        if !conflicts.is_empty() {
            return Err(WarehouseError::SchemaMismatch {
                table: table.to_string(),
                conflicts,
            });
        }

        let path = self.table_dir(table).join(ROWS_FILE);
        let mut buffer = io_utils::csv_writer(Vec::new(), io_utils::DEFAULT_CSV_DELIMITER);
        for row in align_rows(&schema, data) {
            let record: Vec<String> = row
                .iter()
                .map(|cell| cell.as_ref().map(|v| v.as_display()).unwrap_or_default())
                .collect();
            buffer
                .write_record(&record)
                .map_err(|err| WarehouseError::Storage(format!("encoding rows for {table}: {err}")))?;
        }
        let bytes = buffer.into_inner().map_err(|err| {
            WarehouseError::Storage(format!("encoding rows for {table}: {}", err.error()))
        })?;

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|err| WarehouseError::io(&path, err))?;
        let original_len = file
            .metadata()
            .map_err(|err| WarehouseError::io(&path, err))?
            .len();
        if let Err(err) = file.write_all(&bytes).and_then(|()| file.sync_data()) {
            // A load lands whole or not at all.
            if let Err(truncate) = file.set_len(original_len) {
                warn!("Could not roll back partial load into {table}: {truncate}");
            }
            return Err(WarehouseError::io(&path, err));
        }

        let job_id = format!("local-{}", Uuid::new_v4());
        debug!("Load job {job_id} appended {} row(s) to {table}", data.row_count());
        Ok(Box::new(CompletedJob::new(job_id, data.row_count())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        schema::{FieldSchema, FieldType, SchemaConflict},
        typed_table::{Column, SemanticType},
        warehouse::JobState,
    };
    use std::time::Duration;
    use tempfile::tempdir;

    fn people() -> QualifiedTableName {
        QualifiedTableName::new("local", "crm", "people")
    }

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new(vec![
            FieldSchema::required("id", FieldType::Integer),
            FieldSchema::nullable("name", FieldType::String),
        ])
        .unwrap()
    }

    #[test]
    fn table_lifecycle_round_trips_through_the_filesystem() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path().join("wh")).unwrap();
        let dataset = people().dataset_ref();

        assert!(!warehouse.dataset_exists(&dataset).unwrap());
        warehouse.create_dataset(&dataset, "US").unwrap();
        assert!(warehouse.create_dataset(&dataset, "US").unwrap_err().is_already_exists());

        assert!(!warehouse.table_exists(&people()).unwrap());
        warehouse.create_table(&people(), &schema()).unwrap();
        assert!(warehouse.table_exists(&people()).unwrap());
        assert_eq!(warehouse.table_schema(&people()).unwrap(), schema());

        let data = TypedTable::new(
            vec![
                Column::new("id", SemanticType::Integer),
                Column::new("name", SemanticType::Text),
            ],
            vec![
                vec![Some(Value::Integer(1)), Some(Value::Text("Ada, Countess".into()))],
                vec![Some(Value::Integer(2)), None],
            ],
        )
        .unwrap();
        let mut job = warehouse.load_table(&people(), &data).unwrap();
        assert_eq!(
            job.wait(Duration::from_secs(1)).unwrap(),
            JobState::Done { rows_loaded: 2 }
        );
        assert_eq!(warehouse.row_count(&people()).unwrap(), 2);

        warehouse.delete_table(&people()).unwrap();
        assert!(!warehouse.table_exists(&people()).unwrap());
        assert!(matches!(
            warehouse.delete_table(&people()).unwrap_err(),
            WarehouseError::NotFound { .. }
        ));
    }

    #[test]
    fn create_table_requires_the_dataset() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        assert!(matches!(
            warehouse.create_table(&people(), &schema()).unwrap_err(),
            WarehouseError::NotFound { .. }
        ));
    }

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn leftover_table_directory_does_not_block_creation() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        warehouse.create_dataset(&people().dataset_ref(), "US").unwrap();
        let table_dir = warehouse.table_dir(&people());
        fs::create_dir(&table_dir).unwrap();
        fs::write(table_dir.join(ROWS_FILE), "stale,row\n").unwrap();

        assert!(!warehouse.table_exists(&people()).unwrap());
        warehouse.create_table(&people(), &schema()).unwrap();
        assert!(warehouse.table_exists(&people()).unwrap());
        assert_eq!(warehouse.row_count(&people()).unwrap(), 0);

        let dataset_dir = warehouse.dataset_dir(&people().dataset_ref());
        assert_eq!(entry_names(&dataset_dir), vec!["dataset.yml", "people"]);
    }

    #[test]
    fn leftover_dataset_directory_is_replaced() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        let dataset = people().dataset_ref();
        fs::create_dir_all(warehouse.dataset_dir(&dataset)).unwrap();

        assert!(!warehouse.dataset_exists(&dataset).unwrap());
        warehouse.create_dataset(&dataset, "EU").unwrap();
        assert!(warehouse.dataset_exists(&dataset).unwrap());
        assert_eq!(entry_names(&dir.path().join("local")), vec!["crm"]);
    }

    #[test]
    fn second_create_and_delete_leave_no_scratch_directories() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        warehouse.create_dataset(&people().dataset_ref(), "US").unwrap();
        warehouse.create_table(&people(), &schema()).unwrap();

        assert!(
            warehouse
                .create_table(&people(), &schema())
                .unwrap_err()
                .is_already_exists()
        );
        let dataset_dir = warehouse.dataset_dir(&people().dataset_ref());
        assert_eq!(entry_names(&dataset_dir), vec!["dataset.yml", "people"]);

        warehouse.delete_table(&people()).unwrap();
        assert_eq!(entry_names(&dataset_dir), vec!["dataset.yml"]);
    }

    #[test]
    fn rejected_load_leaves_rows_untouched() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        warehouse.create_dataset(&people().dataset_ref(), "US").unwrap();
        warehouse.create_table(&people(), &schema()).unwrap();
        let rows_path = warehouse.table_dir(&people()).join(ROWS_FILE);

        let bad = TypedTable::new(
            vec![Column::new("id", SemanticType::Integer)],
            vec![vec![Some(Value::Integer(1))], vec![None]],
        )
        .unwrap();
        assert!(warehouse.load_table(&people(), &bad).is_err());
        assert_eq!(fs::read(&rows_path).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn load_rejects_missing_required_column() {
        let dir = tempdir().unwrap();
        let warehouse = LocalWarehouse::open(dir.path()).unwrap();
        warehouse.create_dataset(&people().dataset_ref(), "US").unwrap();
        warehouse.create_table(&people(), &schema()).unwrap();

        let data = TypedTable::new(
            vec![Column::new("name", SemanticType::Text)],
            vec![vec![Some(Value::Text("Bob".into()))]],
        )
        .unwrap();
        match warehouse.load_table(&people(), &data).err().unwrap() {
            WarehouseError::SchemaMismatch { conflicts, .. } => assert_eq!(
                conflicts,
                vec![SchemaConflict::MissingRequired {
                    column: "id".into()
                }]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_fails_when_root_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            LocalWarehouse::open(&file).unwrap_err(),
            WarehouseError::Unavailable { .. }
        ));
    }
}
