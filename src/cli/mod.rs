//! The simparity command-line interface.
//!
//! Loads the configuration, resolves the test selection, and drives the two
//! pipelines and the comparison for each subcommand.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Write},
    path::Path,
    process,
    sync::Arc,
};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    catalog::TestCatalog,
    cli::args::{Command, SimParityArgs},
    compare::{self, csv, Report},
    config::{PipelineSelection, SimParityConfig},
    engine::{ExecutionEngine, GroundTruthPipeline, ModelPipeline, PipelineKind},
    err_io,
    result::ExecutionResult,
    transport::{LocalTransport, SshTransport, Transport},
    SimParityError,
};

pub mod args;
pub mod output;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "SIMPARITY_LOG";

/// The main entry point for the CLI.
pub fn run() {
    let args = SimParityArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = dispatch(args) {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        process::exit(code);
    }
}

/// Logs go to stderr so that `select` output stays pipeable.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn dispatch(args: SimParityArgs) -> Result<(), SimParityError> {
    let config = load_config(&args.config, &args.command)?;
    let ids = TestCatalog::from_config(&config.catalog).resolve()?;

    match args.command {
        Command::Select { .. } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            output::print_selection(&mut out, &ids)
                .and_then(|_| out.flush())
                .map_err(|e| err_io!(e, "failed to write selection"))
        }
        Command::Run { pipeline, .. } => handle_run(&config, &ids, pipeline.into()),
        Command::Report { .. } => handle_run(&config, &ids, PipelineSelection::CompareOnly),
    }
}

fn load_config(path: &Path, command: &Command) -> Result<SimParityConfig, SimParityError> {
    SimParityConfig::load(path)?
        .apply(&command.overrides())
        .validate()
}

// ============================================================================
// RUN
// ============================================================================

/// Executes the selected pipelines (or loads their stored outcomes), then
/// compares, writes the CSV reports, and prints the summary.
fn handle_run(
    config: &SimParityConfig,
    ids: &BTreeSet<String>,
    selection: PipelineSelection,
) -> Result<(), SimParityError> {
    let mut stdout = output::stdout_stream();

    let ground_truth = GroundTruthPipeline::new(config.ground_truth.clone(), transport(config));
    let ground_truth_store = ground_truth.mirror_store();
    let ground_truth_engine =
        ExecutionEngine::new(&ground_truth, &ground_truth_store, config.ground_truth.engine);

    let model = ModelPipeline::new(
        config.model.clone(),
        &config.ground_truth.mirror,
        &config.ground_truth.dir_suffix,
    )?;
    let model_store = model.store();
    let model_engine = ExecutionEngine::new(&model, &model_store, config.model.engine);

    // The model reads its inputs from the mirrored RTL build, so the ground
    // truth always goes first.
    let actual = collect(
        &mut stdout,
        &ground_truth_engine,
        PipelineKind::GroundTruth,
        ids,
        selection.runs_ground_truth(),
    )?;
    let predicted = collect(
        &mut stdout,
        &model_engine,
        PipelineKind::Model,
        ids,
        selection.runs_model(),
    )?;

    let records = compare::compare(&actual, &predicted)?;
    let report = Report::build(&records, &config.comparison.bands);
    let stamp = config
        .comparison
        .stamp
        .clone()
        .unwrap_or_else(csv::default_stamp);
    let written = csv::write_reports(&config.comparison.out_dir, &stamp, &records, &report)?;

    output::print_report(&mut stdout, &report, &written)
        .map_err(|e| err_io!(e, "failed to write summary"))
}

fn collect(
    out: &mut termcolor::StandardStream,
    engine: &ExecutionEngine<'_>,
    kind: PipelineKind,
    ids: &BTreeSet<String>,
    execute: bool,
) -> Result<BTreeMap<String, ExecutionResult>, SimParityError> {
    if !execute {
        info!(pipeline = %kind, "loading stored results");
        return Ok(engine.collect_cached(ids));
    }
    let summary = engine.execute_all(ids);
    output::print_execution(out, kind, &summary)
        .map_err(|e| err_io!(e, "failed to write summary"))?;
    Ok(summary.into_results())
}

fn transport(config: &SimParityConfig) -> Arc<dyn Transport> {
    let gt = &config.ground_truth;
    match &gt.host {
        Some(host) => Arc::new(
            SshTransport::new(host.clone())
                .with_user(gt.user.clone())
                .with_port(gt.port)
                .with_identity(gt.identity.clone())
                .with_connect_timeout(gt.connect_timeout_secs),
        ),
        None => Arc::new(LocalTransport),
    }
}
