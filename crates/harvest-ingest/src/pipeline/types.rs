//! Core contracts shared by the worker pool, the result writer and the jobs
//! they run.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::Span;

use super::queue::OutputSender;

/// Default time a worker waits on an empty job queue before giving up.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default number of result writes between sink flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 100;

/// A value travelling on either queue: real data or the end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Item(T),
    Sentinel,
}

/// A unit of dispatchable work.
///
/// Jobs are plain data: everything needed to run them is in the value itself,
/// while per-worker resources arrive through [`JobContext`] and shared
/// resources live in the [`JobHandler`].
pub trait Job: Send + fmt::Debug + 'static {
    /// Short identity used in log lines.
    fn label(&self) -> String {
        format!("{:?}", self)
    }
}

/// Execution strategy for one kind of job.
#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync + 'static {
    /// Result type pushed onto the output queue.
    type Output: Send + 'static;

    /// Run `job` to completion, emitting zero or more results through `ctx`.
    ///
    /// An error fails only this job; the worker moves on to the next one.
    async fn handle(&self, job: J, ctx: &JobContext<Self::Output>) -> anyhow::Result<()>;
}

/// Resources a worker lends to the job it is executing.
pub struct JobContext<R> {
    worker: String,
    span: Span,
    output: OutputSender<R>,
}

impl<R: Send + 'static> JobContext<R> {
    pub fn new(worker: impl Into<String>, span: Span, output: OutputSender<R>) -> Self {
        Self {
            worker: worker.into(),
            span,
            output,
        }
    }

    /// Name of the executing worker.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// The worker's logging span. Components open child spans from it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Push a result onto the output queue.
    ///
    /// `None` means "no match" and is never enqueued. Returns whether a value
    /// was actually sent.
    pub fn emit(&self, result: Option<R>) -> bool {
        match result {
            Some(value) => self.output.send(value),
            None => false,
        }
    }

    /// Push several results in order, returning how many were sent.
    pub fn emit_all<I>(&self, results: I) -> usize
    where
        I: IntoIterator<Item = R>,
    {
        results
            .into_iter()
            .map(|r| self.output.send(r))
            .filter(|sent| *sent)
            .count()
    }
}

/// Sizing and timing of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers; also the number of sentinels the writer waits for.
    pub workers: usize,
    /// How long a worker waits on an empty job queue before terminating.
    pub idle_timeout: Duration,
    /// Flush the sink after this many successful result writes.
    pub flush_every: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::NoWorkers);
        }
        if self.flush_every == 0 {
            return Err(PipelineError::InvalidConfig(
                "flush_every must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a worker stopped pulling jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Consumed its sentinel.
    Sentinel,
    /// Waited out the idle timeout on an empty queue.
    IdleTimeout,
    /// Every producer handle was dropped and the queue is drained.
    QueueClosed,
    /// The worker task itself died; no sentinel was sent for it.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: String,
    pub jobs_started: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub exit: WorkerExit,
}

impl WorkerReport {
    pub(crate) fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            jobs_started: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            exit: WorkerExit::Sentinel,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub results_written: usize,
    pub results_failed: usize,
    pub sentinels: usize,
    /// The output channel closed before every sentinel arrived.
    pub closed_early: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub jobs_queued: usize,
    pub workers: Vec<WorkerReport>,
    pub writer: WriterReport,
}

impl BatchReport {
    pub fn jobs_succeeded(&self) -> usize {
        self.workers.iter().map(|w| w.jobs_succeeded).sum()
    }

    pub fn jobs_failed(&self) -> usize {
        self.workers.iter().map(|w| w.jobs_failed).sum()
    }

    pub fn jobs_started(&self) -> usize {
        self.workers.iter().map(|w| w.jobs_started).sum()
    }
}

/// Errors raised by the batch machinery itself (never by individual jobs).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("At least one worker is required")]
    NoWorkers,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Job queue closed before all jobs were queued")]
    QueueClosed,

    #[error("Failed to open output sink {path}: {source}")]
    SinkOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finalize output sink {path}: {source}")]
    SinkFinish {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Result writer task failed: {0}")]
    WriterTask(String),
}
