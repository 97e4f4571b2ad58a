//! Lookup client contract
//!
//! A lookup is restartable from any offset and reports how its result stream
//! ended, so the executor can tell expected pagination apart from failures.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::descriptor::QueryDescriptor;

/// Which lookup endpoint a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LookupKind {
    /// Exact rrset lookup by owner name.
    #[default]
    RrsetName,
    /// Flexible search with a regular expression over rrnames.
    FlexRegex,
}

impl LookupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LookupKind::RrsetName => "basic",
            LookupKind::FlexRegex => "flex-regex",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LookupRequest<'a> {
    pub descriptor: &'a QueryDescriptor,
    pub offset: usize,
    pub kind: LookupKind,
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Invalid lookup request: {0}")]
    InvalidRequest(String),

    #[error("Lookup service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Lookup service reported failure: {0}")]
    Service(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response line: {0}")]
    Malformed(String),

    #[error("Lookup service sent nothing for {0:?}")]
    Idle(Duration),
}

/// How a result stream ended.
#[derive(Debug)]
pub enum PageEnd {
    /// The service finished the result set.
    Complete,
    /// A size or rate limit cut the result set short; more records exist
    /// past the ones returned.
    Limited,
    /// The stream stopped without a terminating condition. Transient.
    Truncated,
    /// Anything else. Never retried.
    Failed(LookupError),
}

/// Records delivered by one attempt, plus how the attempt ended.
#[derive(Debug)]
pub struct LookupPage {
    pub records: Vec<Value>,
    pub end: PageEnd,
}

impl LookupPage {
    pub fn new(records: Vec<Value>, end: PageEnd) -> Self {
        Self { records, end }
    }

    pub fn failed(error: LookupError) -> Self {
        Self {
            records: Vec::new(),
            end: PageEnd::Failed(error),
        }
    }
}

/// A paginated lookup service.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Run one attempt starting at `request.offset`.
    ///
    /// Implementations report every failure through [`PageEnd`] rather than
    /// an `Err`, keeping whatever records arrived before the failure.
    async fn lookup(&self, request: LookupRequest<'_>) -> LookupPage;
}
