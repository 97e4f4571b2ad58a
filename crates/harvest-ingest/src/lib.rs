//! Harvest Ingest Library
//!
//! Batch collection of research data: a pool of workers drains a job queue
//! and funnels results into a single compressed writer, while query jobs
//! pull complete result sets out of a paginated, rate-limited lookup
//! service.
//!
//! # Example
//!
//! ```no_run
//! use harvest_ingest::censys::{CensysSearchHandler, CensysSearchJob, TargetList};
//! use harvest_ingest::pipeline::{BatchOrchestrator, JsonLines, PoolConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let targets = TargetList::load("targets.csv".as_ref())?;
//! let handler = CensysSearchHandler::new(Arc::new(targets));
//! let jobs = vec![CensysSearchJob { input_file: "hosts-000.json.gz".into() }];
//!
//! let report = BatchOrchestrator::new(handler, JsonLines::new(), PoolConfig::default().with_workers(4))
//!     .run(jobs, "out/matches.json.gz")
//!     .await?;
//! println!("{} jobs succeeded", report.jobs_succeeded());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod censys;
pub mod config;
pub mod dnsdb;
pub mod inputs;
pub mod pipeline;
pub mod query;

pub use pipeline::{BatchOrchestrator, BatchReport, Job, JobContext, JobHandler, PoolConfig};
pub use query::{QueryExecutor, QueryOutcome, QueryPolicy, QueryStatus};
