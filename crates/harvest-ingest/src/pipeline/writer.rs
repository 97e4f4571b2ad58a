//! Fan-in result writer
//!
//! A single writer owns the output sink for the whole batch. It blocks on the
//! output queue with no timeout, appends every result it receives, and stops
//! only after it has counted one sentinel per worker. Write errors on a single
//! result are logged and swallowed so the queue keeps draining.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_jsonlines::JsonLinesWriter;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Span};

use super::queue::OutputReceiver;
use super::types::{Envelope, PipelineError, WriterReport, DEFAULT_FLUSH_EVERY};

/// Turns one result into bytes for the sink.
pub trait RecordSerializer<R>: Send + 'static {
    /// Append the encoded form of `record` to `buf`. On error the buffer is
    /// discarded and nothing reaches the sink.
    fn encode(&mut self, record: &R, buf: &mut Vec<u8>) -> io::Result<()>;
}

/// Newline-delimited JSON, one line per row of a tabular result.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLines<T> {
    _row: PhantomData<fn(&T)>,
}

impl<T> JsonLines<T> {
    pub fn new() -> Self {
        Self { _row: PhantomData }
    }
}

impl<T: Serialize + 'static> RecordSerializer<Vec<T>> for JsonLines<T> {
    fn encode(&mut self, rows: &Vec<T>, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut lines = JsonLinesWriter::new(buf);
        lines.write_all(rows.iter())?;
        lines.flush()
    }
}

/// Single consumer of the output queue.
pub struct ResultWriter<S> {
    path: PathBuf,
    expected_sentinels: usize,
    flush_every: usize,
    serializer: S,
}

impl<S> ResultWriter<S> {
    /// # Arguments
    /// * `path` - Destination of the gzip-compressed sink
    /// * `expected_sentinels` - Number of workers feeding the output queue
    /// * `serializer` - Encoding strategy for each result
    pub fn new(path: impl Into<PathBuf>, expected_sentinels: usize, serializer: S) -> Self {
        Self {
            path: path.into(),
            expected_sentinels,
            flush_every: DEFAULT_FLUSH_EVERY,
            serializer,
        }
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every.max(1);
        self
    }

    /// Run the writer on a dedicated blocking thread.
    pub fn spawn<R>(
        self,
        rx: OutputReceiver<R>,
        span: Span,
    ) -> JoinHandle<Result<WriterReport, PipelineError>>
    where
        R: Send + 'static,
        S: RecordSerializer<R>,
    {
        tokio::task::spawn_blocking(move || span.in_scope(|| self.run(rx)))
    }

    /// Open the sink, drain the queue into it, then finish the gzip stream.
    ///
    /// If the sink cannot be opened the queue is still drained (so no worker
    /// is left waiting on it) and the open error is returned.
    pub fn run<R>(mut self, mut rx: OutputReceiver<R>) -> Result<WriterReport, PipelineError>
    where
        S: RecordSerializer<R>,
    {
        let path_display = self.path.display().to_string();

        let mut sink = match open_sink(&self.path) {
            Ok(sink) => sink,
            Err(source) => {
                error!(path = %path_display, error = %source, "Failed to open output sink");
                let report = self.drain(&mut rx, &mut io::sink());
                warn!(
                    discarded = report.results_written,
                    "Discarded results because the sink never opened"
                );
                return Err(PipelineError::SinkOpen {
                    path: path_display,
                    source,
                });
            },
        };

        info!(path = %path_display, workers = self.expected_sentinels, "Result writer started");
        let report = self.drain(&mut rx, &mut sink);

        let finished = sink
            .finish()
            .and_then(|mut inner| inner.flush());
        if let Err(source) = finished {
            error!(path = %path_display, error = %source, "Failed to finalize output sink");
            return Err(PipelineError::SinkFinish {
                path: path_display,
                source,
            });
        }

        info!(
            path = %path_display,
            written = report.results_written,
            failed = report.results_failed,
            sentinels = report.sentinels,
            "Result writer finished"
        );
        Ok(report)
    }

    /// Core loop, generic over the sink so it can be exercised in memory.
    pub(crate) fn drain<R, W>(&mut self, rx: &mut OutputReceiver<R>, sink: &mut W) -> WriterReport
    where
        S: RecordSerializer<R>,
        W: Write,
    {
        let mut report = WriterReport::default();
        let mut since_flush = 0usize;
        let mut buf = Vec::new();

        while report.sentinels < self.expected_sentinels {
            let result = match rx.blocking_recv() {
                Some(Envelope::Item(result)) => result,
                Some(Envelope::Sentinel) => {
                    report.sentinels += 1;
                    debug!(
                        received = report.sentinels,
                        expected = self.expected_sentinels,
                        "Worker finished"
                    );
                    continue;
                },
                None => {
                    warn!(
                        received = report.sentinels,
                        expected = self.expected_sentinels,
                        "Output queue closed before every worker signalled completion"
                    );
                    report.closed_early = true;
                    break;
                },
            };

            buf.clear();
            let written = self
                .serializer
                .encode(&result, &mut buf)
                .and_then(|()| sink.write_all(&buf));

            match written {
                Ok(()) => {
                    report.results_written += 1;
                    since_flush += 1;
                    if since_flush >= self.flush_every {
                        since_flush = 0;
                        if let Err(e) = sink.flush() {
                            error!(error = %e, "Failed to flush output sink");
                        }
                    }
                },
                Err(e) => {
                    report.results_failed += 1;
                    error!(error = %e, "Failed to write result, skipping");
                },
            }
        }

        if let Err(e) = sink.flush() {
            error!(error = %e, "Failed to flush output sink");
        }
        report
    }
}

fn open_sink(path: &Path) -> io::Result<GzEncoder<BufWriter<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
}
