//! Warehouse schema model, inference, and load compatibility.
//!
//! This module owns the [`SchemaDescriptor`] (the column list a warehouse table
//! is created with), the [`FieldType`] and [`FieldMode`] enums, and the
//! inference that maps a decoded [`TypedTable`] onto warehouse types.
//!
//! ## Responsibilities
//!
//! - Fixed semantic → warehouse type mapping ([`infer`], [`infer_with_required`])
//! - The fixed bootstrap contract used by the simpler ingestion mode
//! - Order-insensitive schema equality
//! - Conflict detection between a remote schema and incoming data
//! - YAML persistence and text rendering of descriptors

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    render,
    typed_table::{SemanticType, TypedTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    String,
}

impl FieldType {
    /// Text is the fallback for anything the decoder could not resolve.
    pub fn for_semantic(semantic: SemanticType) -> Self {
        match semantic {
            SemanticType::Integer => FieldType::Integer,
            SemanticType::Float => FieldType::Float,
            SemanticType::Boolean => FieldType::Boolean,
            SemanticType::Timestamp => FieldType::Timestamp,
            SemanticType::Text | SemanticType::Unresolved => FieldType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::String => "STRING",
        }
    }

    /// Whether values of `semantic` type can be stored in a field of this type.
    pub fn accepts(&self, semantic: SemanticType) -> bool {
        match self {
            FieldType::Float => matches!(semantic, SemanticType::Integer | SemanticType::Float),
            other => *other == FieldType::for_semantic(semantic),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT64" | "INT" => Ok(FieldType::Integer),
            "FLOAT" | "FLOAT64" | "DOUBLE" => Ok(FieldType::Float),
            "BOOLEAN" | "BOOL" => Ok(FieldType::Boolean),
            "TIMESTAMP" | "DATETIME" => Ok(FieldType::Timestamp),
            "STRING" | "TEXT" => Ok(FieldType::String),
            other => Err(anyhow!("Unknown field type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMode::Nullable => f.write_str("NULLABLE"),
            FieldMode::Required => f.write_str("REQUIRED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
}

impl FieldSchema {
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
        }
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Required,
        }
    }

    pub fn is_required(&self) -> bool {
        self.mode == FieldMode::Required
    }
}

/// Column list of a warehouse table. Field order is kept for display only;
/// equality compares fields by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    fields: Vec<FieldSchema>,
}

impl PartialEq for SchemaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|field| other.field(&field.name) == Some(field))
    }
}

impl Eq for SchemaDescriptor {}

impl SchemaDescriptor {
    pub fn new(fields: Vec<FieldSchema>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            ensure!(!field.name.trim().is_empty(), "Field names cannot be empty");
            ensure!(
                seen.insert(field.name.as_str()),
                "Duplicate field name '{}'",
                field.name
            );
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Lists every reason the warehouse would refuse to append `data` to a
    /// table with this schema. An empty list means the load is compatible.
    pub fn load_conflicts(&self, data: &TypedTable) -> Vec<SchemaConflict> {
        let mut conflicts = Vec::new();

        for (idx, column) in data.columns().iter().enumerate() {
            let Some(field) = self.field(&column.name) else {
                conflicts.push(SchemaConflict::UnknownColumn {
                    column: column.name.clone(),
                });
                continue;
            };
            if !field.field_type.accepts(column.semantic_type) && data.column_has_values(idx) {
                conflicts.push(SchemaConflict::TypeMismatch {
                    column: column.name.clone(),
                    expected: field.field_type,
                    found: FieldType::for_semantic(column.semantic_type),
                });
            }
        }

        for field in self.fields.iter().filter(|f| f.is_required()) {
            match data.column_index(&field.name) {
                None => conflicts.push(SchemaConflict::MissingRequired {
                    column: field.name.clone(),
                }),
                Some(idx) => {
                    if let Some(row) = data.column_values(idx).position(|v| v.is_none()) {
                        conflicts.push(SchemaConflict::NullInRequired {
                            column: field.name.clone(),
                            row: row + 1,
                        });
                    }
                }
            }
        }

        conflicts
    }

    pub fn render(&self) -> String {
        let headers = vec![
            "#".to_string(),
            "name".to_string(),
            "type".to_string(),
            "mode".to_string(),
        ];
        let rows: Vec<Vec<String>> = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                vec![
                    (idx + 1).to_string(),
                    field.name.clone(),
                    field.field_type.to_string(),
                    field.mode.to_string(),
                ]
            })
            .collect();
        render::render_table(&headers, &rows)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let parsed: SchemaDescriptor =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        SchemaDescriptor::new(parsed.fields)
            .with_context(|| format!("Validating schema file {path:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaConflict {
    UnknownColumn {
        column: String,
    },
    TypeMismatch {
        column: String,
        expected: FieldType,
        found: FieldType,
    },
    MissingRequired {
        column: String,
    },
    NullInRequired {
        column: String,
        row: usize,
    },
}

impl fmt::Display for SchemaConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaConflict::UnknownColumn { column } => {
                write!(f, "column '{column}' does not exist in the table")
            }
            SchemaConflict::TypeMismatch {
                column,
                expected,
                found,
            } => write!(f, "column '{column}' is {expected} but the data is {found}"),
            SchemaConflict::MissingRequired { column } => {
                write!(f, "required column '{column}' is missing from the data")
            }
            SchemaConflict::NullInRequired { column, row } => {
                write!(f, "required column '{column}' is null in row {row}")
            }
        }
    }
}

/// Maps the table's column types onto warehouse types. Every field is nullable.
pub fn infer(table: &TypedTable) -> SchemaDescriptor {
    let fields = table
        .columns()
        .iter()
        .map(|column| FieldSchema::nullable(&column.name, FieldType::for_semantic(column.semantic_type)))
        .collect();
    SchemaDescriptor { fields }
}

/// Like [`infer`], with the named columns marked `REQUIRED`.
pub fn infer_with_required(table: &TypedTable, required: &[String]) -> SchemaDescriptor {
    let mut schema = infer(table);
    for name in required {
        match schema.fields.iter_mut().find(|f| &f.name == name) {
            Some(field) => field.mode = FieldMode::Required,
            None => warn!("Required column '{name}' is not present in the data; ignoring"),
        }
    }
    debug!(
        "Inferred {} field(s), {} required",
        schema.len(),
        schema.fields.iter().filter(|f| f.is_required()).count()
    );
    schema
}

/// The fixed `id`/`name` contract used when ingesting with the bootstrap schema.
pub fn bootstrap_schema() -> SchemaDescriptor {
    SchemaDescriptor {
        fields: vec![
            FieldSchema::required("id", FieldType::Integer),
            FieldSchema::required("name", FieldType::String),
            FieldSchema::nullable("age", FieldType::Integer),
            FieldSchema::nullable("city", FieldType::String),
        ],
    }
}
