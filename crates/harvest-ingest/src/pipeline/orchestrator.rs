//! Batch orchestrator
//!
//! Queues every job followed by one sentinel per worker, starts the worker
//! pool and the result writer together, then joins the workers before the
//! writer. The writer only stops after each worker has sent its sentinel, so
//! the join order matters.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::queue::{job_queue, output_queue};
use super::types::{
    BatchReport, Job, JobHandler, PipelineError, PoolConfig, WorkerExit, WorkerReport,
};
use super::worker::worker_loop;
use super::writer::{RecordSerializer, ResultWriter};

/// Runs one batch of jobs through a worker pool into a single output sink.
pub struct BatchOrchestrator<H, S> {
    handler: Arc<H>,
    serializer: S,
    config: PoolConfig,
}

impl<H, S> BatchOrchestrator<H, S> {
    pub fn new(handler: H, serializer: S, config: PoolConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            serializer,
            config,
        }
    }

    /// Execute `jobs` and write every result to `output_path`.
    ///
    /// Returns once every worker and the writer have terminated. Individual
    /// job failures only show up in the report and the logs; the error path
    /// is reserved for configuration problems and sink failures.
    pub async fn run<J, I>(
        self,
        jobs: I,
        output_path: impl AsRef<Path>,
    ) -> Result<BatchReport, PipelineError>
    where
        J: Job,
        H: JobHandler<J>,
        S: RecordSerializer<H::Output>,
        I: IntoIterator<Item = J>,
    {
        self.config.validate()?;

        let batch_id = Uuid::new_v4();
        let batch_span = info_span!("batch", id = %batch_id);
        let workers = self.config.workers;

        // 1. Queue all jobs, then one sentinel per worker
        let (mut producer, consumer) = job_queue();
        for job in jobs {
            producer.push(job)?;
        }
        producer.push_sentinels(workers)?;
        let jobs_queued = producer.queued();
        drop(producer);

        batch_span.in_scope(|| {
            info!(
                jobs = jobs_queued,
                workers,
                output = %output_path.as_ref().display(),
                "Starting batch"
            )
        });

        // 2. Start the workers and the writer together
        let (output_tx, output_rx) = output_queue();

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let name = format!("worker-{}", i);
            let span = info_span!(parent: &batch_span, "worker", name = %name);
            handles.push((
                name.clone(),
                tokio::spawn(worker_loop(
                    name,
                    Arc::clone(&self.handler),
                    consumer.clone(),
                    output_tx.clone(),
                    self.config.idle_timeout,
                    span,
                )),
            ));
        }
        // Only the workers may hold output senders, otherwise the writer's
        // queue would never close.
        drop(output_tx);
        drop(consumer);

        let writer = ResultWriter::new(output_path.as_ref(), workers, self.serializer)
            .with_flush_every(self.config.flush_every);
        let writer_span = info_span!(parent: &batch_span, "writer");
        let writer_handle = writer.spawn(output_rx, writer_span);

        // 3. Join workers first, then the writer
        let mut worker_reports = Vec::with_capacity(workers);
        for (name, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(parent: &batch_span, worker = %name, error = %e, "Worker task aborted");
                    let mut report = WorkerReport::new(name);
                    report.exit = WorkerExit::Aborted;
                    report
                },
            };
            worker_reports.push(report);
        }

        let writer_report = writer_handle
            .instrument(batch_span.clone())
            .await
            .map_err(|e| PipelineError::WriterTask(e.to_string()))??;

        let report = BatchReport {
            jobs_queued,
            workers: worker_reports,
            writer: writer_report,
        };

        batch_span.in_scope(|| {
            info!(
                queued = report.jobs_queued,
                succeeded = report.jobs_succeeded(),
                failed = report.jobs_failed(),
                written = report.writer.results_written,
                "Batch complete"
            )
        });

        Ok(report)
    }
}
