//! Job and output queues
//!
//! Both queues are unbounded tokio channels of [`Envelope`]s. The job queue is
//! multi-consumer: every worker shares the receiving half behind an async
//! mutex. The output queue is multi-producer/single-consumer: each worker owns
//! a sender and the result writer owns the only receiver.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::types::{Envelope, PipelineError};

/// Create a job queue, returning its producer and a shareable consumer.
pub fn job_queue<J>() -> (JobProducer<J>, JobConsumer<J>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        JobProducer { tx, queued: 0 },
        JobConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Create an output queue.
pub fn output_queue<R>() -> (OutputSender<R>, OutputReceiver<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutputSender { tx }, OutputReceiver { rx })
}

/// Writing half of the job queue, held by the orchestrator.
pub struct JobProducer<J> {
    tx: mpsc::UnboundedSender<Envelope<J>>,
    queued: usize,
}

impl<J> JobProducer<J> {
    pub fn push(&mut self, job: J) -> Result<(), PipelineError> {
        self.tx
            .send(Envelope::Item(job))
            .map_err(|_| PipelineError::QueueClosed)?;
        self.queued += 1;
        Ok(())
    }

    /// Append one sentinel per worker.
    pub fn push_sentinels(&mut self, count: usize) -> Result<(), PipelineError> {
        for _ in 0..count {
            self.tx
                .send(Envelope::Sentinel)
                .map_err(|_| PipelineError::QueueClosed)?;
        }
        Ok(())
    }

    /// Number of jobs (not sentinels) pushed so far.
    pub fn queued(&self) -> usize {
        self.queued
    }
}

/// What a worker got back from the job queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<J> {
    Job(J),
    Sentinel,
    TimedOut,
    Closed,
}

/// Reading half of the job queue. Cloning shares the same queue.
pub struct JobConsumer<J> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope<J>>>>,
}

impl<J> Clone for JobConsumer<J> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<J> JobConsumer<J> {
    /// Pop the next envelope, waiting at most `timeout`.
    pub async fn pop(&self, timeout: Duration) -> Popped<J> {
        let next = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match next {
            Ok(Some(Envelope::Item(job))) => Popped::Job(job),
            Ok(Some(Envelope::Sentinel)) => Popped::Sentinel,
            Ok(None) => Popped::Closed,
            Err(_) => Popped::TimedOut,
        }
    }
}

/// Producer handle on the output queue.
pub struct OutputSender<R> {
    tx: mpsc::UnboundedSender<Envelope<R>>,
}

impl<R> Clone for OutputSender<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R> OutputSender<R> {
    /// Send a result. Returns `false` if the writer is gone.
    pub fn send(&self, result: R) -> bool {
        if self.tx.send(Envelope::Item(result)).is_err() {
            tracing::warn!("Output queue closed, dropping result");
            return false;
        }
        true
    }

    /// Announce that this producer is done. Consumes the handle so each
    /// producer can signal at most once.
    pub fn finish(self) {
        if self.tx.send(Envelope::Sentinel).is_err() {
            tracing::warn!("Output queue closed before sentinel could be sent");
        }
    }
}

/// The single consumer of the output queue.
pub struct OutputReceiver<R> {
    rx: mpsc::UnboundedReceiver<Envelope<R>>,
}

impl<R> OutputReceiver<R> {
    /// Block the current (non-async) thread until the next envelope arrives.
    /// `None` once every sender has been dropped and the queue is drained.
    pub fn blocking_recv(&mut self) -> Option<Envelope<R>> {
        self.rx.blocking_recv()
    }

    pub async fn recv(&mut self) -> Option<Envelope<R>> {
        self.rx.recv().await
    }
}
