use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::reconcile::ExistingTableAction;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load tabular files into a warehouse table with schema reconciliation",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest every supported file in the data directory
    Ingest(IngestArgs),
    /// Load a single file, asking what to do if the table already exists
    Load(LoadArgs),
    /// Decode a file and print the warehouse schema inferred from it
    Infer(InferArgs),
    /// Show the destination table's schema and row count
    Describe(DescribeArgs),
}

/// Settings shared by every command; each overrides the config file value.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Destination table as `project.dataset.table`
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Directory scanned for input files
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    /// Root directory of the local warehouse
    #[arg(long = "warehouse-root")]
    pub warehouse_root: Option<PathBuf>,
    /// Outcome log destination (JSON Lines, appended)
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
    /// Location used when the dataset has to be created
    #[arg(long = "dataset-location")]
    pub dataset_location: Option<String>,
    /// Seconds to wait for a load job before giving up
    #[arg(long = "load-timeout-secs")]
    pub load_timeout_secs: Option<u64>,
    /// Use the fixed id/name/age/city schema instead of inferring one
    #[arg(long = "bootstrap-schema")]
    pub bootstrap_schema: bool,
    /// Column to mark REQUIRED in inferred schemas (repeatable)
    #[arg(long = "required", action = clap::ArgAction::Append)]
    pub required: Vec<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Action when the table already exists (defaults to cancel)
    #[arg(long = "on-existing", value_enum)]
    pub on_existing: Option<ExistingTableAction>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// File to load
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Answer the "table exists" question up front instead of prompting
    #[arg(long = "on-existing", value_enum)]
    pub on_existing: Option<ExistingTableAction>,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// File to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Write the inferred schema to this YAML file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delimiter_accepts_names_and_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter(":"), Ok(b':'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn load_command_parses_shared_flags() {
        let cli = Cli::try_parse_from([
            "warehouse-ingest",
            "load",
            "-i",
            "people.csv",
            "--table",
            "p.d.t",
            "--required",
            "id",
            "--required",
            "name",
            "--on-existing",
            "recreate",
        ])
        .unwrap();
        let Commands::Load(args) = cli.command else {
            panic!("expected load command");
        };
        assert_eq!(args.input, PathBuf::from("people.csv"));
        assert_eq!(args.config.table.as_deref(), Some("p.d.t"));
        assert_eq!(args.config.required, vec!["id", "name"]);
        assert_eq!(args.on_existing, Some(ExistingTableAction::Recreate));
    }
}
