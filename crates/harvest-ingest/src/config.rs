//! Run configuration
//!
//! Each command reads its settings from an env file given on the command
//! line. Relative paths resolve against the project directory
//! (`HARVEST_PROJECT_DIR`, default: the working directory).

use chrono::{DateTime, Utc};
use harvest_common::{env, HarvestError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::{PoolConfig, DEFAULT_FLUSH_EVERY, DEFAULT_IDLE_TIMEOUT_SECS};
use crate::query::dnsdb::{DnsdbClientConfig, DEFAULT_SERVER_URL, DEFAULT_TIMEOUT_SECS};
use crate::query::executor::{DEFAULT_MAX_PAGES, DEFAULT_MAX_RETRIES};
use crate::query::{QueryPolicy, DEFAULT_TIME_FENCE};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default number of workers.
pub const DEFAULT_NUM_PROCESSES: usize = 1;

/// Query columns read from a DNSDB query list when `QUERY_FIELDS` is unset.
pub const DEFAULT_QUERY_FIELDS: [&str; 3] =
    ["domain_A_queries", "domain_AAAA_queries", "domain_CNAME_queries"];

/// UTC timestamp prefixed to every output file name.
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%SZ";

/// `<timestamp>_<file name>` next to `path`.
pub fn timestamped_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}", now.format(OUTPUT_TIMESTAMP_FORMAT), name))
}

/// Worker pool settings shared by every command.
fn pool_from_env() -> Result<PoolConfig> {
    Ok(PoolConfig::default()
        .with_workers(env::parse_or("NUM_PROCESSES", DEFAULT_NUM_PROCESSES)?)
        .with_idle_timeout(Duration::from_secs(env::parse_or(
            "WORKER_IDLE_TIMEOUT_SECS",
            DEFAULT_IDLE_TIMEOUT_SECS,
        )?))
        .with_flush_every(env::parse_or("WRITER_FLUSH_EVERY", DEFAULT_FLUSH_EVERY)?))
}

fn validate_pool(pool: &PoolConfig) -> Result<()> {
    if pool.workers == 0 {
        return Err(HarvestError::config("NUM_PROCESSES must be greater than 0"));
    }
    if pool.flush_every == 0 {
        return Err(HarvestError::config("WRITER_FLUSH_EVERY must be greater than 0"));
    }
    if pool.idle_timeout.is_zero() {
        return Err(HarvestError::config("WORKER_IDLE_TIMEOUT_SECS must be greater than 0"));
    }
    Ok(())
}

// ============================================================================
// Censys certificate search
// ============================================================================

#[derive(Debug, Clone)]
pub struct CensysSearchConfig {
    /// Directory holding `*.json.gz` host-record files.
    pub input_dir: PathBuf,
    /// CSV of `Company_name,generalized_domain` targets.
    pub domain_list_path: PathBuf,
    /// Final, timestamped output path.
    pub output_path: PathBuf,
    pub pool: PoolConfig,
}

impl CensysSearchConfig {
    /// Load from the current environment (after the env file was applied).
    ///
    /// Missing inputs are reported here, before any worker starts.
    pub fn load(now: DateTime<Utc>) -> Result<Self> {
        let project_dir = env::project_dir()?;

        let input_dir = env::require_existing(env::resolve_path(
            &project_dir,
            &env::required("INPUT_FILE_PATH")?,
        ))?;
        let domain_list_path = env::require_existing(env::resolve_path(
            &project_dir,
            &env::required("CENSYS_DOMAIN_LIST_PATH")?,
        ))?;
        let output_path = timestamped_path(
            &env::resolve_path(&project_dir, &env::required("OUTPUT_FILE_PATH")?),
            now,
        );

        let config = Self {
            input_dir,
            domain_list_path,
            output_path,
            pool: pool_from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(HarvestError::config(format!(
                "INPUT_FILE_PATH must be a directory: {}",
                self.input_dir.display()
            )));
        }
        if self.output_path.file_name().is_none() {
            return Err(HarvestError::config("OUTPUT_FILE_PATH must name a file"));
        }
        validate_pool(&self.pool)
    }
}

// ============================================================================
// DNSDB query batch
// ============================================================================

#[derive(Debug, Clone)]
pub struct DnsdbQueryConfig {
    /// CSV of queries with a `company` column.
    pub input_path: PathBuf,
    /// Final, timestamped output path inside `OUTPUT_FILE_DIR`.
    pub output_path: PathBuf,
    pub query_fields: Vec<String>,
    pub client: DnsdbClientConfig,
    pub policy: QueryPolicy,
    pub pool: PoolConfig,
}

impl DnsdbQueryConfig {
    pub fn load(now: DateTime<Utc>) -> Result<Self> {
        let project_dir = env::project_dir()?;

        let input_path = env::require_existing(env::resolve_path(
            &project_dir,
            &env::required("INPUT_FILE_PATH")?,
        ))?;
        let output_dir = env::resolve_path(&project_dir, &env::required("OUTPUT_FILE_DIR")?);
        let output_path = dnsdb_output_path(
            &output_dir,
            &input_path,
            env::optional("QUERY_ROUND").as_deref(),
            now,
        );

        let query_fields = env::list("QUERY_FIELDS").unwrap_or_else(|| {
            DEFAULT_QUERY_FIELDS.iter().map(|f| f.to_string()).collect()
        });

        let client = DnsdbClientConfig::new(env::required("DNSDB_API_KEY")?)
            .with_server_url(
                env::optional("DNSDB_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            )
            .with_timeout(Duration::from_secs(env::parse_or(
                "DNSDB_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?));

        let policy = QueryPolicy {
            max_retries: env::parse_or("DNSDB_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            max_pages: env::parse_or("DNSDB_MAX_PAGES", DEFAULT_MAX_PAGES)?,
            time_fence: env::parse_or("DNSDB_TIME_FENCE", DEFAULT_TIME_FENCE)?,
        };

        let config = Self {
            input_path,
            output_path,
            query_fields,
            client,
            policy,
            pool: pool_from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_fields.is_empty() {
            return Err(HarvestError::config("QUERY_FIELDS must name at least one column"));
        }
        if !self.client.server_url.starts_with("http://")
            && !self.client.server_url.starts_with("https://")
        {
            return Err(HarvestError::InvalidVar {
                name: "DNSDB_SERVER_URL".to_string(),
                value: self.client.server_url.clone(),
            });
        }
        if self.client.timeout.is_zero() {
            return Err(HarvestError::config("DNSDB_TIMEOUT_SECS must be greater than 0"));
        }
        validate_pool(&self.pool)
    }
}

/// `<dir>/<timestamp>_<input stem>[_query_round_<round>]_dnsdb_results.json.gz`
pub fn dnsdb_output_path(
    output_dir: &Path,
    input_path: &Path,
    query_round: Option<&str>,
    now: DateTime<Utc>,
) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match query_round {
        Some(round) => format!("{}_query_round_{}", stem, round),
        None => stem,
    };
    timestamped_path(&output_dir.join(format!("{}_dnsdb_results.json.gz", stem)), now)
}
