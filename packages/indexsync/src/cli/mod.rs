//! Command surface
//!
//! ```bash
//! # Recreate every index and fill it
//! indexsync create-index
//!
//! # Reindex posts changed during the last two hours
//! indexsync update-index blog.post --since 2h
//!
//! # Recreate one facet from records changed since a date, at most 500 of them
//! indexsync create-index blog.post.search --since 2024-01-05-14:30 --limit 500
//! ```
//!
//! The application owns its record store and declarations, so it supplies a
//! built `IndexRuntime` and calls `main_with` from its own binary.

pub mod since;
pub mod targets;

pub use since::{parse_since, parse_since_at};
pub use targets::select_targets;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use tracing::{error, info};

use crate::errors::{Result, SyncError};
use crate::features::index::IndexRuntime;

#[derive(Debug, Parser)]
#[command(name = "indexsync")]
#[command(about = "Create and populate search indexes from the record store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Recreate the index schema, then index the selected records
    CreateIndex(IndexArgs),

    /// Index the selected records into existing indexes
    UpdateIndex(IndexArgs),
}

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    /// `app`, `app.model` or `app.model.facet`; all indexes when omitted
    pub targets: Vec<String>,

    /// Only records modified after this time: yyyy-mm-dd[-hh:mm] or [#d][#h][#m][#s]
    #[arg(long, value_parser = since::since_arg)]
    pub since: Option<DateTime<Utc>>,

    /// Index at most this many records per index
    #[arg(long)]
    pub limit: Option<usize>,
}

impl Command {
    fn args(&self) -> &IndexArgs {
        match self {
            Command::CreateIndex(args) | Command::UpdateIndex(args) => args,
        }
    }
}

/// Execute a parsed command, writing progress lines to `out`
pub fn run(cli: &Cli, runtime: &IndexRuntime, out: &mut impl Write) -> Result<()> {
    let args = cli.command.args();
    let push_schema = matches!(cli.command, Command::CreateIndex(_));

    for index in select_targets(runtime.registry(), &args.targets)? {
        let bound = runtime.bind(&index)?;
        let records = bound.backfill_queryset(args.since, None, args.limit)?;

        if push_schema {
            writeln!(out, "Creating mapping for {}.{}", index.record_type(), index.facet())?;
            bound.push_schema()?;
        }

        writeln!(out, "Indexing {} {} objects", records.len(), index.record_type())?;
        let outcome = bound.upsert_many(&records)?;
        info!(
            index = %index.key(),
            total = outcome.total,
            succeeded = outcome.success_count,
            failed = outcome.errors.len(),
            elapsed_ms = outcome.duration.as_millis() as u64,
            "Indexed records"
        );
    }
    Ok(())
}

/// Parse `args` (program name first) and run
pub fn run_from_args<I, T>(args: I, runtime: &IndexRuntime, out: &mut impl Write) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| SyncError::invalid_argument(e.to_string()))?;
    run(&cli, runtime, out)
}

/// Binary entry point: logging from `RUST_LOG` (default `info`), arguments
/// from the process, progress on stdout
pub fn main_with(runtime: &IndexRuntime) -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    match run(&cli, runtime, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // An application that already installed a subscriber keeps it
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_index() {
        let cli = Cli::try_parse_from([
            "indexsync",
            "create-index",
            "blog.post",
            "shop",
            "--since",
            "2024-01-05",
            "--limit",
            "10",
        ])
        .unwrap();

        let Command::CreateIndex(args) = cli.command else {
            panic!("expected create-index");
        };
        assert_eq!(args.targets, vec!["blog.post", "shop"]);
        assert_eq!(args.since.unwrap().to_rfc3339(), "2024-01-05T00:00:00+00:00");
        assert_eq!(args.limit, Some(10));
    }

    #[test]
    fn test_parse_rejects_bad_since() {
        assert!(Cli::try_parse_from(["indexsync", "update-index", "--since", "later"]).is_err());
    }

    #[test]
    fn test_update_index_defaults() {
        let cli = Cli::try_parse_from(["indexsync", "update-index"]).unwrap();
        let args = cli.command.args();
        assert!(args.targets.is_empty());
        assert!(args.since.is_none());
        assert!(args.limit.is_none());
    }
}
