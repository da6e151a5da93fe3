//! floe CLI: runs pipeline stages against the configured stores.

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use snafu::prelude::*;
use tracing::{error, info};

use floe::{
    CliArgs, Command, Config, Pipeline, PipelineError, PostgresSource, PostgresWarehouse,
    TableSource, Warehouse, init_metrics, init_tracing,
};
use floe_core::error::MissingSectionSnafu;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.logging.format);

    if config.metrics.enabled {
        if let Err(e) = init_metrics(&config.metrics.address) {
            eprintln!("Failed to start metrics exporter: {e}");
            return ExitCode::FAILURE;
        }
    }

    let now = args.now.unwrap_or_else(Utc::now);
    info!(command = ?args.command, %now, "floe starting");

    match run(args.command, config, now).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("floe failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn connect_source(config: &Config) -> Result<PostgresSource, PipelineError> {
    let source = config
        .source
        .as_ref()
        .context(MissingSectionSnafu { section: "source" })?;
    Ok(PostgresSource::connect(source).await?)
}

async fn connect_warehouse(config: &Config) -> Result<PostgresWarehouse, PipelineError> {
    let warehouse = config
        .warehouse
        .as_ref()
        .context(MissingSectionSnafu {
            section: "warehouse",
        })?;
    Ok(PostgresWarehouse::connect(warehouse).await?)
}

async fn run(
    command: Command,
    config: Config,
    now: chrono::DateTime<Utc>,
) -> Result<(), PipelineError> {
    let pipeline = Pipeline::from_config(config).await?;

    let reports = match command {
        Command::Extract => {
            let source = connect_source(pipeline.config()).await?;
            vec![pipeline.extract(&source, now).await?]
        }
        Command::Dedup => vec![pipeline.deduplicate().await?],
        Command::Merge => vec![pipeline.merge().await?],
        Command::Transform => {
            let transformed = pipeline.transform(now).await?;
            let relocated = pipeline.relocate(&transformed.consumed).await?;
            vec![transformed.report, relocated]
        }
        Command::Load => {
            let warehouse = connect_warehouse(pipeline.config()).await?;
            vec![pipeline.load(&warehouse).await?]
        }
        Command::Run => {
            let source = if pipeline.config().source.is_some() {
                Some(connect_source(pipeline.config()).await?)
            } else {
                None
            };
            let warehouse = if pipeline.config().warehouse.is_some() {
                Some(connect_warehouse(pipeline.config()).await?)
            } else {
                None
            };
            pipeline
                .run_all(
                    source.as_ref().map(|s| s as &dyn TableSource),
                    warehouse.as_ref().map(|w| w as &dyn Warehouse),
                    now,
                )
                .await?
        }
    };

    for report in reports.iter().filter(|r| r.has_failures()) {
        error!(stage = %report.stage, tables = ?report.failed, "Stage finished with failed tables");
    }
    Ok(())
}
