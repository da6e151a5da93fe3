//! Command-line arguments of the `floe` binary.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "floe")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, env = "FLOE_CONFIG")]
    pub config: PathBuf,

    /// Invocation time (RFC 3339). Defaults to the current time; set it to
    /// replay a past run.
    #[arg(long, value_parser = parse_now)]
    pub now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stage to run.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Pull new rows from the source database.
    Extract,
    /// Delete redundant and empty snapshots.
    Dedup,
    /// Fold new snapshots into latest state.
    Merge,
    /// Write star-schema parquet files and relocate consumed snapshots.
    Transform,
    /// Load the newest parquet files into the warehouse.
    Load,
    /// Every stage in order.
    Run,
}

fn parse_now(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
}
