//! DNSDB query batch
//!
//! Reads a query list, turns every (row, query column) pair into a job, and
//! runs the jobs through the worker pool. Each job drives the query executor
//! and emits the records it accumulated, tagged with the row's company.

use anyhow::Context;
use async_trait::async_trait;
use harvest_common::{HarvestError, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DnsdbQueryConfig;
use crate::pipeline::{BatchOrchestrator, BatchReport, Job, JobContext, JobHandler, JsonLines};
use crate::query::{DnsdbClient, LookupClient, LookupKind, QueryExecutor, QueryStatus};

/// Prefix some query lists carry in front of `<name>/<rrtype>`.
const RRSET_NAME_PREFIX: &str = "rrset/name/";

const COMPANY_COLUMN: &str = "company";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsdbQueryJob {
    pub query: String,
    pub company: Option<String>,
}

impl Job for DnsdbQueryJob {
    fn label(&self) -> String {
        match &self.company {
            Some(company) => format!("{} ({})", self.query, company),
            None => self.query.clone(),
        }
    }
}

/// Build one job per non-empty query cell.
///
/// Duplicate rows are dropped. Configured query columns missing from the
/// header are skipped with a warning.
pub fn load_query_list(path: &Path, query_fields: &[String]) -> Result<Vec<DnsdbQueryJob>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let company_idx = headers.iter().position(|h| h == COMPANY_COLUMN);
    if company_idx.is_none() {
        warn!(path = %path.display(), "Query list has no company column");
    }

    let mut columns = Vec::with_capacity(query_fields.len());
    for field in query_fields {
        match headers.iter().position(|h| h == field) {
            Some(idx) => columns.push(idx),
            None => warn!(field = %field, "Query column is not in the query list"),
        }
    }
    if columns.is_empty() {
        return Err(HarvestError::config(format!(
            "None of the query columns {:?} exist in {}",
            query_fields,
            path.display()
        )));
    }

    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    let mut duplicates = 0usize;

    for row in reader.records() {
        let row = row?;
        let key: Vec<String> = row.iter().map(str::to_string).collect();
        if !seen.insert(key) {
            duplicates += 1;
            continue;
        }

        let company = company_idx
            .and_then(|idx| row.get(idx))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        for &idx in &columns {
            let query = row
                .get(idx)
                .unwrap_or_default()
                .trim()
                .replace(RRSET_NAME_PREFIX, "");
            if query.is_empty() {
                continue;
            }
            jobs.push(DnsdbQueryJob {
                query,
                company: company.clone(),
            });
        }
    }

    info!(
        path = %path.display(),
        jobs = jobs.len(),
        duplicate_rows = duplicates,
        "Loaded query list"
    );
    Ok(jobs)
}

/// Runs one query to completion and emits its records.
pub struct DnsdbQueryHandler<C: ?Sized> {
    executor: QueryExecutor<C>,
}

impl<C: LookupClient + ?Sized> DnsdbQueryHandler<C> {
    pub fn new(executor: QueryExecutor<C>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl<C> JobHandler<DnsdbQueryJob> for DnsdbQueryHandler<C>
where
    C: LookupClient + ?Sized + 'static,
{
    type Output = Vec<Value>;

    async fn handle(&self, job: DnsdbQueryJob, ctx: &JobContext<Vec<Value>>) -> anyhow::Result<()> {
        let outcome = self.executor.execute(&job.query, ctx.span()).await;

        if outcome.status != QueryStatus::Success {
            warn!(
                parent: ctx.span(),
                query = %job.query,
                status = %outcome.status,
                records = outcome.records.len(),
                "Query ended early, keeping partial results"
            );
        }

        let records = tag_with_company(outcome.records, job.company.as_deref());
        ctx.emit((!records.is_empty()).then_some(records));
        Ok(())
    }
}

/// Add `"company"` to every record object. Non-object records are dropped.
fn tag_with_company(records: Vec<Value>, company: Option<&str>) -> Vec<Value> {
    let company = company.map_or(Value::Null, |c| Value::String(c.to_string()));
    records
        .into_iter()
        .filter_map(|record| match record {
            Value::Object(mut map) => {
                map.insert(COMPANY_COLUMN.to_string(), company.clone());
                Some(Value::Object(map))
            },
            other => {
                warn!(record = %other, "Dropping non-object record");
                None
            },
        })
        .collect()
}

/// Run every query in the configured list and write the results.
pub async fn run_queries(config: DnsdbQueryConfig, kind: LookupKind) -> anyhow::Result<BatchReport> {
    let jobs = load_query_list(&config.input_path, &config.query_fields)
        .with_context(|| format!("Failed to load query list {}", config.input_path.display()))?;

    let client = Arc::new(DnsdbClient::new(config.client).context("Failed to build DNSDB client")?);
    let handler = DnsdbQueryHandler::new(QueryExecutor::new(client, kind, config.policy));

    info!(
        mode = %kind,
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        workers = config.pool.workers,
        "Running DNSDB queries"
    );

    let report = BatchOrchestrator::new(handler, JsonLines::new(), config.pool)
        .run(jobs, &config.output_path)
        .await?;
    Ok(report)
}
