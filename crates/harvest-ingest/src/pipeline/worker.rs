//! Worker loop
//!
//! Each worker pulls jobs from the shared job queue and runs them one at a
//! time through a [`JobHandler`]. A failing or panicking job is logged and
//! skipped. Whatever ends the loop, the worker sends exactly one sentinel on
//! the output queue before returning, which is what lets the result writer
//! know when every producer is done.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument, Span};

use super::queue::{JobConsumer, OutputSender, Popped};
use super::types::{Job, JobContext, JobHandler, WorkerExit, WorkerReport};

/// Run one worker until it consumes a sentinel, times out, or the queue closes.
pub async fn worker_loop<J, H>(
    name: String,
    handler: Arc<H>,
    jobs: JobConsumer<J>,
    output: OutputSender<H::Output>,
    idle_timeout: Duration,
    span: Span,
) -> WorkerReport
where
    J: Job,
    H: JobHandler<J>,
{
    let run_span = span.clone();
    async move {
        let mut report = WorkerReport::new(name.clone());
        let ctx = JobContext::new(name.clone(), span, output.clone());

        report.exit = loop {
            let job = match jobs.pop(idle_timeout).await {
                Popped::Job(job) => job,
                Popped::Sentinel => break WorkerExit::Sentinel,
                Popped::TimedOut => {
                    info!(
                        idle_timeout_secs = idle_timeout.as_secs(),
                        "Job queue is empty, giving up"
                    );
                    break WorkerExit::IdleTimeout;
                },
                Popped::Closed => {
                    warn!("Job queue closed without a sentinel");
                    break WorkerExit::QueueClosed;
                },
            };

            report.jobs_started += 1;
            let label = job.label();
            info!(job = %label, "Starting job");

            match AssertUnwindSafe(handler.handle(job, &ctx)).catch_unwind().await {
                Ok(Ok(())) => {
                    report.jobs_succeeded += 1;
                    info!(job = %label, "Finished job");
                },
                Ok(Err(e)) => {
                    report.jobs_failed += 1;
                    error!(job = %label, error = ?e, "Job failed, skipping");
                },
                Err(panic) => {
                    report.jobs_failed += 1;
                    error!(job = %label, panic = %panic_message(&*panic), "Job panicked, skipping");
                },
            }
        };

        drop(ctx);
        output.finish();

        info!(
            processed = report.jobs_started,
            failed = report.jobs_failed,
            exit = ?report.exit,
            "Worker terminating"
        );
        report
    }
    .instrument(run_span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::queue::{job_queue, output_queue};
    use crate::pipeline::types::Envelope;
    use async_trait::async_trait;

    #[derive(Debug)]
    enum Step {
        Emit(u32),
        Nothing,
        Fail,
        Panic,
    }

    impl Job for Step {}

    struct StepHandler;

    #[async_trait]
    impl JobHandler<Step> for StepHandler {
        type Output = u32;

        async fn handle(&self, job: Step, ctx: &JobContext<u32>) -> anyhow::Result<()> {
            match job {
                Step::Emit(n) => {
                    ctx.emit(Some(n));
                    Ok(())
                },
                Step::Nothing => {
                    ctx.emit(None);
                    Ok(())
                },
                Step::Fail => anyhow::bail!("malformed input"),
                Step::Panic => panic!("boom"),
            }
        }
    }

    async fn drain<R>(rx: &mut crate::pipeline::queue::OutputReceiver<R>) -> Vec<Envelope<R>> {
        let mut seen = Vec::new();
        while let Some(env) = rx.recv().await {
            seen.push(env);
        }
        seen
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_worker() {
        let (mut producer, consumer) = job_queue();
        for step in [Step::Fail, Step::Emit(1), Step::Panic, Step::Nothing, Step::Emit(2)] {
            producer.push(step).unwrap();
        }
        producer.push_sentinels(1).unwrap();

        let (tx, mut rx) = output_queue();
        let report = worker_loop(
            "worker-0".to_string(),
            Arc::new(StepHandler),
            consumer,
            tx,
            Duration::from_secs(1),
            Span::none(),
        )
        .await;

        assert_eq!(report.jobs_started, 5);
        assert_eq!(report.jobs_succeeded, 3);
        assert_eq!(report.jobs_failed, 2);
        assert_eq!(report.exit, WorkerExit::Sentinel);

        assert_eq!(
            drain(&mut rx).await,
            vec![Envelope::Item(1), Envelope::Item(2), Envelope::Sentinel]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_still_sends_sentinel() {
        let (_producer, consumer) = job_queue::<Step>();
        let (tx, mut rx) = output_queue();

        let report = worker_loop(
            "idle".to_string(),
            Arc::new(StepHandler),
            consumer,
            tx,
            Duration::from_secs(30),
            Span::none(),
        )
        .await;

        assert_eq!(report.exit, WorkerExit::IdleTimeout);
        assert_eq!(report.jobs_started, 0);
        assert_eq!(drain(&mut rx).await, vec![Envelope::Sentinel]);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static message"), "static message");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
