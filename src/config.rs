//! Run configuration: YAML file values merged with command-line overrides.
//!
//! The merged [`IngestConfig`] is built once at start-up and only read after
//! that.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cli::{ConfigArgs, parse_delimiter},
    decode::DecodeOptions,
    io_utils,
    reconcile::ExistingTableAction,
    schema::{self, SchemaDescriptor},
    typed_table::TypedTable,
    warehouse::QualifiedTableName,
};

pub const DEFAULT_DATASET_LOCATION: &str = "US";
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Desired schema is inferred from each decoded file.
    #[default]
    Inferred,
    /// Every file targets the fixed bootstrap schema.
    Bootstrap,
}

/// On-disk form; every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub table: Option<QualifiedTableName>,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub warehouse_root: PathBuf,
    pub dataset_location: String,
    pub load_timeout_secs: u64,
    pub on_existing: Option<ExistingTableAction>,
    pub schema_mode: SchemaMode,
    pub required_columns: Vec<String>,
    pub csv_delimiter: Option<String>,
    pub input_encoding: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            table: None,
            data_dir: PathBuf::from("data"),
            log_file: Path::new("logs").join("etl.log"),
            warehouse_root: PathBuf::from("warehouse"),
            dataset_location: DEFAULT_DATASET_LOCATION.to_string(),
            load_timeout_secs: DEFAULT_LOAD_TIMEOUT_SECS,
            on_existing: None,
            schema_mode: SchemaMode::Inferred,
            required_columns: Vec::new(),
            csv_delimiter: None,
            input_encoding: None,
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))
    }

    fn for_args(args: &ConfigArgs) -> Result<Self> {
        match &args.config {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// How input files are read and which schema they should produce.
#[derive(Debug, Clone, Default)]
pub struct InputSettings {
    pub schema_mode: SchemaMode,
    pub required_columns: Vec<String>,
    pub decode: DecodeOptions,
}

impl InputSettings {
    /// Same as [`IngestConfig::resolve`] for commands that never touch the table.
    pub fn resolve(args: &ConfigArgs) -> Result<Self> {
        Self::merge(&ConfigFile::for_args(args)?, args)
    }

    fn merge(file: &ConfigFile, args: &ConfigArgs) -> Result<Self> {
        let file_delimiter = file
            .csv_delimiter
            .as_deref()
            .map(parse_delimiter)
            .transpose()
            .map_err(|err| anyhow!("Invalid csv_delimiter in config: {err}"))?;
        let encoding_label = args
            .input_encoding
            .as_deref()
            .or(file.input_encoding.as_deref());
        let decode = DecodeOptions {
            csv_delimiter: args.delimiter.or(file_delimiter),
            encoding: io_utils::resolve_encoding(encoding_label)?,
        };

        let mut required_columns = file.required_columns.clone();
        for name in &args.required {
            if !required_columns.contains(name) {
                required_columns.push(name.clone());
            }
        }

        Ok(Self {
            schema_mode: if args.bootstrap_schema {
                SchemaMode::Bootstrap
            } else {
                file.schema_mode
            },
            required_columns,
            decode,
        })
    }

    /// The schema a table should be created with for `data`.
    pub fn desired_schema(&self, data: &TypedTable) -> SchemaDescriptor {
        match self.schema_mode {
            SchemaMode::Inferred => schema::infer_with_required(data, &self.required_columns),
            SchemaMode::Bootstrap => schema::bootstrap_schema(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub table: QualifiedTableName,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub warehouse_root: PathBuf,
    pub dataset_location: String,
    pub load_timeout: Duration,
    pub on_existing: Option<ExistingTableAction>,
    pub input: InputSettings,
}

impl IngestConfig {
    /// Defaults for everything except the destination table.
    pub fn new(table: QualifiedTableName) -> Self {
        let defaults = ConfigFile::default();
        Self {
            table,
            data_dir: defaults.data_dir,
            log_file: defaults.log_file,
            warehouse_root: defaults.warehouse_root,
            dataset_location: defaults.dataset_location,
            load_timeout: Duration::from_secs(defaults.load_timeout_secs),
            on_existing: None,
            input: InputSettings::default(),
        }
    }

    /// Loads `--config` (if given) and applies the remaining flags on top.
    pub fn resolve(args: &ConfigArgs) -> Result<Self> {
        Self::merge(ConfigFile::for_args(args)?, args)
    }

    pub fn merge(file: ConfigFile, args: &ConfigArgs) -> Result<Self> {
        let input = InputSettings::merge(&file, args)?;
        let table = match &args.table {
            Some(raw) => raw.parse::<QualifiedTableName>()?,
            None => file.table.ok_or_else(|| {
                anyhow!("No destination table configured; pass --table or set `table` in the config file")
            })?,
        };

        let load_timeout_secs = args.load_timeout_secs.unwrap_or(file.load_timeout_secs);
        ensure!(load_timeout_secs > 0, "load_timeout_secs must be greater than zero");
        let dataset_location = args
            .dataset_location
            .clone()
            .unwrap_or(file.dataset_location);
        ensure!(
            !dataset_location.trim().is_empty(),
            "dataset_location cannot be empty"
        );

        Ok(Self {
            table,
            data_dir: args.data_dir.clone().unwrap_or(file.data_dir),
            log_file: args.log_file.clone().unwrap_or(file.log_file),
            warehouse_root: args.warehouse_root.clone().unwrap_or(file.warehouse_root),
            dataset_location,
            load_timeout: Duration::from_secs(load_timeout_secs),
            on_existing: file.on_existing,
            input,
        })
    }
}
