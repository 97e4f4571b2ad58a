//! Censys certificate search
//!
//! One job per host-record file. Each job extracts TLS certificate data,
//! matches it against the target list, and emits the matched rows as a
//! single result.

pub mod extract;
pub mod matcher;

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span};

use crate::config::CensysSearchConfig;
use crate::inputs::{enumerate_inputs, HOST_RECORD_SUFFIX};
use crate::pipeline::{BatchOrchestrator, BatchReport, Job, JobContext, JobHandler, JsonLines};

pub use extract::{read_certificates, CertificateRecord, ExtractStats};
pub use matcher::{DomainMatch, Target, TargetList, SEARCH_METHOD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensysSearchJob {
    pub input_file: PathBuf,
}

impl Job for CensysSearchJob {
    fn label(&self) -> String {
        self.input_file.display().to_string()
    }
}

pub struct CensysSearchHandler {
    targets: Arc<TargetList>,
}

impl CensysSearchHandler {
    pub fn new(targets: Arc<TargetList>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl JobHandler<CensysSearchJob> for CensysSearchHandler {
    type Output = Vec<DomainMatch>;

    async fn handle(
        &self,
        job: CensysSearchJob,
        ctx: &JobContext<Vec<DomainMatch>>,
    ) -> anyhow::Result<()> {
        let targets = Arc::clone(&self.targets);
        let span = info_span!(parent: ctx.span(), "censys_file", file = %job.label());
        let path = job.input_file;

        // Decompression and matching are CPU and disk bound.
        let matches = tokio::task::spawn_blocking(move || {
            span.in_scope(|| -> anyhow::Result<Vec<DomainMatch>> {
                let (certificates, stats) = read_certificates(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                debug!(
                    hosts = stats.hosts,
                    malformed_hosts = stats.malformed_hosts,
                    skipped_services = stats.skipped_services,
                    certificates = certificates.len(),
                    "Extracted certificates"
                );
                let matches = targets.match_certificates(&certificates);
                info!(matches = matches.len(), "Matched certificates against targets");
                Ok(matches)
            })
        })
        .await
        .context("Certificate search task failed")??;

        ctx.emit((!matches.is_empty()).then_some(matches));
        Ok(())
    }
}

/// Search every host-record file in the configured directory.
pub async fn run_search(config: CensysSearchConfig) -> anyhow::Result<BatchReport> {
    let inputs = enumerate_inputs(&config.input_dir, HOST_RECORD_SUFFIX)
        .with_context(|| format!("Failed to list inputs in {}", config.input_dir.display()))?;
    let targets = TargetList::load(&config.domain_list_path).with_context(|| {
        format!("Failed to load target list {}", config.domain_list_path.display())
    })?;

    info!(
        inputs = inputs.len(),
        targets = targets.len(),
        output = %config.output_path.display(),
        workers = config.pool.workers,
        "Running Censys certificate search"
    );

    let handler = CensysSearchHandler::new(Arc::new(targets));
    let jobs = inputs
        .into_iter()
        .map(|input_file| CensysSearchJob { input_file });

    let report = BatchOrchestrator::new(handler, JsonLines::new(), config.pool)
        .run(jobs, &config.output_path)
        .await?;
    Ok(report)
}
