//! Query executor
//!
//! Pulls a complete result set out of a paginated lookup service. Each attempt
//! is classified into an [`AttemptOutcome`] and fed to a [`RetryState`], which
//! decides whether to page forward, retry from the same offset, or stop:
//!
//! ```text
//!             Continue{offset}         (no retry consumed)
//!            ┌───────────────┐
//!            ▼               │
//!  ──▶  QUERYING ────────────┘ ── Complete ──────────────▶ Success
//!        │   ▲
//!        │   └─ Retryable, retries <= max ─┐
//!        │                                 │ (same offset)
//!        ├─ Retryable, retries > max ─────────────────────▶ RetryExhausted
//!        ├─ Fatal ────────────────────────────────────────▶ Failed
//!        └─ continuations > max_pages ────────────────────▶ PageBudgetExhausted
//! ```
//!
//! The executor never returns an error. Every failure ends up as a terminal
//! [`QueryStatus`] next to whatever records were accumulated.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::client::{LookupClient, LookupKind, LookupRequest, PageEnd};
use super::descriptor::{QueryDescriptor, DEFAULT_TIME_FENCE};

pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_MAX_PAGES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    /// Retries allowed after truncated attempts, per query.
    pub max_retries: u32,
    /// Maximum number of "more available" continuations per query.
    pub max_pages: usize,
    /// Minimum "time last seen" sent with every attempt.
    pub time_fence: i64,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_pages: DEFAULT_MAX_PAGES,
            time_fence: DEFAULT_TIME_FENCE,
        }
    }
}

/// Classification of one finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Complete,
    /// More records exist; resume from `offset`.
    Continue { offset: usize },
    Retryable,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    RetryExhausted,
    Failed,
    PageBudgetExhausted,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryStatus::Success => "success",
            QueryStatus::RetryExhausted => "retry_exhausted",
            QueryStatus::Failed => "failed",
            QueryStatus::PageBudgetExhausted => "page_budget_exhausted",
        })
    }
}

/// What the executor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Page forward.
    Query { offset: usize },
    /// Repeat the last attempt unchanged.
    Retry { offset: usize },
    Stop(QueryStatus),
}

/// Retry and pagination bookkeeping for a single query.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: QueryPolicy,
    offset: usize,
    retries: u32,
    continuations: usize,
}

impl RetryState {
    pub fn new(policy: QueryPolicy) -> Self {
        Self {
            policy,
            offset: 0,
            retries: 0,
            continuations: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn advance(&mut self, outcome: AttemptOutcome) -> Transition {
        match outcome {
            AttemptOutcome::Complete => Transition::Stop(QueryStatus::Success),
            AttemptOutcome::Continue { offset } => {
                self.continuations += 1;
                if self.continuations > self.policy.max_pages {
                    return Transition::Stop(QueryStatus::PageBudgetExhausted);
                }
                self.offset = offset;
                Transition::Query { offset }
            },
            AttemptOutcome::Retryable => {
                self.retries += 1;
                if self.retries > self.policy.max_retries {
                    return Transition::Stop(QueryStatus::RetryExhausted);
                }
                Transition::Retry {
                    offset: self.offset,
                }
            },
            AttemptOutcome::Fatal => Transition::Stop(QueryStatus::Failed),
        }
    }
}

/// Everything a query produced, however it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub query: String,
    pub records: Vec<Value>,
    pub status: QueryStatus,
    pub attempts: u32,
    /// Retries actually issued.
    pub retries: u32,
}

impl QueryOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Drives a [`LookupClient`] through the retry state machine.
pub struct QueryExecutor<C: ?Sized> {
    client: Arc<C>,
    kind: LookupKind,
    policy: QueryPolicy,
}

impl<C: ?Sized> Clone for QueryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            kind: self.kind,
            policy: self.policy,
        }
    }
}

impl<C: LookupClient + ?Sized> QueryExecutor<C> {
    pub fn new(client: Arc<C>, kind: LookupKind, policy: QueryPolicy) -> Self {
        Self {
            client,
            kind,
            policy,
        }
    }

    /// Run `query` (`<name>/<rrtype>`) to a terminal status.
    ///
    /// A query that does not parse is a hard failure: nothing is sent and
    /// the outcome is empty.
    pub async fn execute(&self, query: &str, parent: &Span) -> QueryOutcome {
        let span = info_span!(parent: parent, "query", query = %query, kind = %self.kind);

        async {
            match QueryDescriptor::parse(query, self.policy.time_fence) {
                Ok(descriptor) => self.run(query, &descriptor).await,
                Err(e) => {
                    error!(error = %e, "Malformed query, not sending");
                    QueryOutcome {
                        query: query.to_string(),
                        records: Vec::new(),
                        status: QueryStatus::Failed,
                        attempts: 0,
                        retries: 0,
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &str, descriptor: &QueryDescriptor) -> QueryOutcome {
        let mut state = RetryState::new(self.policy);
        let mut records: Vec<Value> = Vec::new();
        let mut attempts = 0u32;
        let mut retries = 0u32;

        let status = loop {
            // The offset always equals the number of records kept so far.
            let mark = records.len();
            attempts += 1;

            let page = self
                .client
                .lookup(LookupRequest {
                    descriptor,
                    offset: state.offset(),
                    kind: self.kind,
                })
                .await;

            let received = page.records.len();
            records.extend(page.records);

            let outcome = match page.end {
                PageEnd::Complete => AttemptOutcome::Complete,
                PageEnd::Limited => {
                    debug!(received, total = records.len(), "Result limit reached, paging forward");
                    AttemptOutcome::Continue {
                        offset: records.len(),
                    }
                },
                PageEnd::Truncated => {
                    warn!(received, attempt = attempts, "Result set truncated");
                    AttemptOutcome::Retryable
                },
                PageEnd::Failed(e) => {
                    error!(error = %e, received, "Lookup failed, not retrying");
                    AttemptOutcome::Fatal
                },
            };

            match state.advance(outcome) {
                Transition::Query { .. } => {},
                Transition::Retry { offset } => {
                    // The retry re-reads these from the same offset.
                    records.truncate(mark);
                    retries += 1;
                    info!(offset, retry = retries, "Retrying query");
                },
                Transition::Stop(status) => break status,
            }
        };

        if status == QueryStatus::PageBudgetExhausted {
            warn!(
                max_pages = self.policy.max_pages,
                records = records.len(),
                "Page budget exhausted, keeping partial results"
            );
        }

        info!(
            %status,
            attempts,
            retries,
            records = records.len(),
            "Finished query"
        );

        QueryOutcome {
            query: query.to_string(),
            records,
            status,
            attempts,
            retries,
        }
    }
}
