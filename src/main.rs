use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use traffic_report::cli::{Cli, Command};
use traffic_report::commands::{catalogue_listing, Inspector};
use traffic_report::demo::DemoDataset;
use traffic_report::report::TargetOutcome;
use traffic_report::{DriverRegistry, Pipeline, ReportConfig, RunObserver, TracingObserver};

/// Some targets or queries failed but a report was produced
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads the environment
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    traffic_report::logging::init(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ReportConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.overrides.apply(&mut config);

    if let Command::DemoDataset { path, rows, seed } = &cli.command {
        let written = DemoDataset::new(path)
            .table(config.dataset.table.clone())
            .rows(*rows)
            .seed(*seed)
            .write()
            .with_context(|| format!("writing demo dataset to {}", path.display()))?;
        println!("Wrote {} rows to table {} in {}", written, config.dataset.table, path.display());
        return Ok(ExitCode::SUCCESS);
    }

    config.validate()?;
    let registry = DriverRegistry::with_defaults();
    let observer: Arc<dyn RunObserver> = Arc::new(TracingObserver);

    match &cli.command {
        Command::Run => run_report(config, registry, observer).await,
        Command::Check => {
            let inspector = Inspector::new(&config, &registry, observer).await?;
            let session = inspector.check().await?;
            println!("Connection OK ({}, session {})", config.connection.describe(), session);
            Ok(ExitCode::SUCCESS)
        }
        Command::Tables => {
            let inspector = Inspector::new(&config, &registry, observer).await?;
            for table in inspector.tables().await? {
                println!("{}", table);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Describe { table } => {
            let inspector = Inspector::new(&config, &registry, observer).await?;
            let columns = inspector.describe(table).await?;
            let width = columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
            for column in columns {
                println!("{:<width$}  {}", column.name, column.data_type, width = width);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Count { table } => {
            let inspector = Inspector::new(&config, &registry, observer).await?;
            println!("{}", inspector.count(table).await?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Catalogue => {
            let pipeline = Pipeline::new(config, Arc::new(registry), observer);
            print!("{}", catalogue_listing(&pipeline.catalogue()));
            Ok(ExitCode::SUCCESS)
        }
        Command::DemoDataset { .. } => Ok(ExitCode::SUCCESS),
    }
}

async fn run_report(
    config: ReportConfig,
    registry: DriverRegistry,
    observer: Arc<dyn RunObserver>,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let pipeline = Pipeline::new(config, Arc::new(registry), observer);
    let run = pipeline.run(cancel).await?;

    println!("Report run {} ({})", run.run_id(), run.summary());
    for record in run.targets() {
        match &record.outcome {
            TargetOutcome::Succeeded { artifact } => {
                println!("  ok       {:<28} {}", record.target, artifact.path.display())
            }
            TargetOutcome::Failed { reason } => println!("  FAILED   {:<28} {}", record.target, reason),
            TargetOutcome::Skipped { reason } => println!("  skipped  {:<28} {}", record.target, reason),
        }
    }
    if let Some(manifest) = run.manifest() {
        println!("Manifest: {}", manifest.display());
    }

    if run.is_complete_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}
