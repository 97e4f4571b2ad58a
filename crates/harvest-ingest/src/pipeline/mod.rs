//! Worker pool with a fan-in result writer.
//!
//! ```text
//!                 ┌──────────┐
//!  jobs + N ──▶   │ worker 0 │ ──┐
//!  sentinels      ├──────────┤   │   output queue    ┌───────────────┐
//!  (job queue)    │ worker 1 │ ──┼──────────────────▶│ result writer │──▶ .json.gz
//!                 ├──────────┤   │  results + one    └───────────────┘
//!                 │   ...    │ ──┘  sentinel each
//!                 └──────────┘
//! ```

pub mod orchestrator;
pub mod queue;
pub mod types;
pub mod worker;
pub mod writer;

pub use orchestrator::BatchOrchestrator;
pub use queue::{job_queue, output_queue, JobConsumer, JobProducer, OutputReceiver, OutputSender, Popped};
pub use types::{
    BatchReport, Envelope, Job, JobContext, JobHandler, PipelineError, PoolConfig, WorkerExit,
    WorkerReport, WriterReport, DEFAULT_FLUSH_EVERY, DEFAULT_IDLE_TIMEOUT_SECS,
};
pub use worker::worker_loop;
pub use writer::{JsonLines, RecordSerializer, ResultWriter};
