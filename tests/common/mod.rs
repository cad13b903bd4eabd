#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use warehouse_ingest::{config::IngestConfig, warehouse::QualifiedTableName};

pub const TABLE: &str = "acme.crm.people";

pub fn table() -> QualifiedTableName {
    TABLE.parse().expect("valid table name")
}

/// Scratch directory laid out like a deployment: `data/`, `logs/`, `warehouse/`.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory with an empty `data/` folder.
    pub fn new() -> Self {
        let temp_dir = tempdir().expect("temp dir");
        fs::create_dir(temp_dir.path().join("data")).expect("create data dir");
        Self { temp_dir }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path().join("data")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path().join("logs").join("etl.log")
    }

    pub fn warehouse_root(&self) -> PathBuf {
        self.path().join("warehouse")
    }

    /// Writes `contents` into the data directory and returns the path.
    pub fn write_data(&self, name: &str, contents: &str) -> PathBuf {
        self.write(&format!("data/{name}"), contents)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Configuration pointing every path at this workspace.
    pub fn config(&self) -> IngestConfig {
        let mut config = IngestConfig::new(table());
        config.data_dir = self.data_dir();
        config.log_file = self.log_file();
        config.warehouse_root = self.warehouse_root();
        config
    }
}
