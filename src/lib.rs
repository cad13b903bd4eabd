pub mod cli;
pub mod config;
pub mod data;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod io_utils;
pub mod outcome;
pub mod reconcile;
pub mod render;
pub mod schema;
pub mod typed_table;
pub mod warehouse;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::{IngestConfig, InputSettings},
    ingest::Orchestrator,
    outcome::{IngestionOutcome, OutcomeLog, OutcomeStatus},
    reconcile::{DecisionPolicy, ExistingTableAction, FixedPolicy, PromptPolicy},
    warehouse::{LocalWarehouse, Warehouse},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("warehouse_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Load(args) => handle_load(&args),
        Commands::Infer(args) => handle_infer(&args),
        Commands::Describe(args) => handle_describe(&args),
    }
}

fn open_warehouse(config: &IngestConfig) -> Result<LocalWarehouse> {
    LocalWarehouse::open(&config.warehouse_root)
        .with_context(|| format!("Opening warehouse at {:?}", config.warehouse_root))
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let config = IngestConfig::resolve(&args.config)?;
    let action = args.on_existing.or(config.on_existing).unwrap_or_else(|| {
        info!("No on_existing action configured; existing tables will not be modified");
        ExistingTableAction::Cancel
    });
    info!(
        "Ingesting files from {:?} into {}",
        config.data_dir, config.table
    );
    let warehouse = open_warehouse(&config)?;
    let log = OutcomeLog::open(&config.log_file)?;
    debug!("Outcome log: {:?}", config.log_file);

    let mut policy = FixedPolicy(action);
    let mut orchestrator = Orchestrator::new(config, &warehouse, log);
    let outcomes = orchestrator.run_directory(&mut policy)?;
    print_outcomes(&outcomes);
    Ok(())
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let config = IngestConfig::resolve(&args.config)?;
    let mut policy: Box<dyn DecisionPolicy> = match args.on_existing.or(config.on_existing) {
        Some(action) => Box::new(FixedPolicy(action)),
        None => Box::new(PromptPolicy::stdio()),
    };
    let warehouse = open_warehouse(&config)?;
    let log = OutcomeLog::open(&config.log_file)?;

    let mut orchestrator = Orchestrator::new(config, &warehouse, log);
    let outcome = orchestrator.run_interactive(&args.input, policy.as_mut())?;
    print_outcomes(std::slice::from_ref(&outcome));
    if outcome.status == OutcomeStatus::Failed {
        let message = outcome
            .error
            .as_ref()
            .map(|detail| detail.message.clone())
            .unwrap_or_default();
        bail!("Loading {:?} failed: {message}", args.input);
    }
    Ok(())
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let settings = InputSettings::resolve(&args.config)?;
    let data = decode::decode_file(&args.input, &settings.decode)
        .with_context(|| format!("Decoding {:?}", args.input))?;
    let schema = settings.desired_schema(&data);
    info!(
        "Decoded {} row(s) across {} column(s) from {:?}",
        data.row_count(),
        data.column_count(),
        args.input
    );
    print!("{}", schema.render());
    if let Some(output) = &args.output {
        schema
            .save(output)
            .with_context(|| format!("Writing schema to {output:?}"))?;
        info!("Schema with {} field(s) written to {output:?}", schema.len());
    }
    Ok(())
}

fn handle_describe(args: &cli::DescribeArgs) -> Result<()> {
    let config = IngestConfig::resolve(&args.config)?;
    let warehouse = open_warehouse(&config)?;
    let table = &config.table;
    if !warehouse.table_exists(table)? {
        println!("Table {table} does not exist");
        return Ok(());
    }
    let schema = warehouse.table_schema(table)?;
    let rows = warehouse.row_count(table)?;
    println!("Table {table}");
    print!("{}", schema.render());
    println!("{rows} row(s)");
    Ok(())
}

fn print_outcomes(outcomes: &[IngestionOutcome]) {
    let headers = vec![
        "file".to_string(),
        "status".to_string(),
        "decision".to_string(),
        "rows".to_string(),
        "detail".to_string(),
    ];
    let rows: Vec<Vec<String>> = outcomes
        .iter()
        .map(|outcome| {
            let detail = outcome
                .error
                .as_ref()
                .map(|detail| detail.message.clone())
                .or_else(|| outcome.reason.clone())
                .unwrap_or_default();
            vec![
                outcome
                    .file
                    .path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| outcome.file.path.display().to_string()),
                outcome.status.to_string(),
                outcome
                    .decision
                    .map(|decision| decision.to_string())
                    .unwrap_or_default(),
                outcome.rows_loaded.to_string(),
                detail,
            ]
        })
        .collect();
    render::print_table(&headers, &rows);
}
