//! Harvest Ingest - batch data collection tool

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use harvest_common::{env, HarvestError};
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_ingest::config::{CensysSearchConfig, DnsdbQueryConfig};
use harvest_ingest::pipeline::BatchReport;
use harvest_ingest::query::LookupKind;
use harvest_ingest::{censys, dnsdb};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvest-ingest")]
#[command(author, version, about = "Batch collection of certificate and passive DNS data")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (debug level, overrides HARVEST_LOG_LEVEL)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search Censys host records for certificates naming target domains
    CensysSearch {
        /// Environment file with INPUT_FILE_PATH, CENSYS_DOMAIN_LIST_PATH, OUTPUT_FILE_PATH
        env_file: PathBuf,
    },

    /// Run a list of DNSDB queries
    DnsdbQuery {
        /// Environment file with INPUT_FILE_PATH, OUTPUT_FILE_DIR, DNSDB_API_KEY
        env_file: PathBuf,

        /// Lookup API to query
        #[arg(short, long, value_enum, default_value_t = Mode::Basic)]
        mode: Mode,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// rrset lookup by name
    Basic,
    /// Flexible search with regular expressions
    FlexRegex,
}

impl From<Mode> for LookupKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Basic => LookupKind::RrsetName,
            Mode::FlexRegex => LookupKind::FlexRegex,
        }
    }
}

impl Command {
    fn env_file(&self) -> &PathBuf {
        match self {
            Command::CensysSearch { env_file } | Command::DnsdbQuery { env_file, .. } => env_file,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::CensysSearch { .. } => "censys-search",
            Command::DnsdbQuery { .. } => "dnsdb-query",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load the env file first so HARVEST_LOG_* settings in it apply.
    let env_loaded = env::load_env_file(cli.command.env_file());

    let log_config = LogConfig::builder()
        .log_file_prefix(cli.command.name())
        .build()
        .merge_env()?
        .with_level_override(cli.verbose.then_some(LogLevel::Debug));

    let _guard = init_logging(&log_config)?;

    if let Err(e) = env_loaded {
        error!(error = %e, "Failed to load environment file, terminating");
        return Err(e.into());
    }

    let started = Utc::now();
    let report = match cli.command {
        Command::CensysSearch { .. } => {
            let config = CensysSearchConfig::load(started).inspect_err(log_config_error)?;
            censys::run_search(config).await?
        },
        Command::DnsdbQuery { mode, .. } => {
            let config = DnsdbQueryConfig::load(started).inspect_err(log_config_error)?;
            dnsdb::run_queries(config, mode.into()).await?
        },
    };

    summarize(&report);
    Ok(())
}

fn log_config_error(e: &HarvestError) {
    error!(error = %e, startup_fatal = e.is_startup_fatal(), "Failed to load configuration, terminating");
}

fn summarize(report: &BatchReport) {
    info!(
        queued = report.jobs_queued,
        succeeded = report.jobs_succeeded(),
        failed = report.jobs_failed(),
        results_written = report.writer.results_written,
        results_failed = report.writer.results_failed,
        "All tasks are finished"
    );
    if report.jobs_failed() > 0 || report.writer.results_failed > 0 {
        warn!("Some inputs were skipped, see the log above for details");
    }
}
