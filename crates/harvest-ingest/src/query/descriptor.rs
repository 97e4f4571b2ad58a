//! Query descriptors: `<name>/<rrtype>` plus a fixed time-fence.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 2021-01-01T00:00:00Z. Records last seen before this are filtered out.
pub const DEFAULT_TIME_FENCE: i64 = 1_609_459_200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("Query is empty")]
    Empty,

    #[error("Query {0:?} is missing a record type (expected <name>/<rrtype>)")]
    MissingRrtype(String),

    #[error("Query {0:?} has an empty name")]
    EmptyName(String),

    #[error("Query {query:?} has an invalid record type {rrtype:?}")]
    InvalidRrtype { query: String, rrtype: String },
}

/// One lookup target, held fixed across every attempt made for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub name: String,
    pub rrtype: String,
    /// Minimum "time last seen", in epoch seconds.
    pub time_fence: i64,
}

impl QueryDescriptor {
    /// Parse `<name>/<rrtype>`. The record type is the text after the last
    /// slash, so names may themselves contain slashes (regex patterns do).
    pub fn parse(query: &str, time_fence: i64) -> Result<Self, QueryParseError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryParseError::Empty);
        }

        let (name, rrtype) = query
            .rsplit_once('/')
            .ok_or_else(|| QueryParseError::MissingRrtype(query.to_string()))?;

        if name.is_empty() {
            return Err(QueryParseError::EmptyName(query.to_string()));
        }
        if rrtype.is_empty() || !rrtype.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(QueryParseError::InvalidRrtype {
                query: query.to_string(),
                rrtype: rrtype.to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            rrtype: rrtype.to_ascii_uppercase(),
            time_fence,
        })
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.rrtype)
    }
}
