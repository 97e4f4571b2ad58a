//! Resilient paginated queries against an external lookup service.

pub mod client;
pub mod descriptor;
pub mod dnsdb;
pub mod executor;

pub use client::{LookupClient, LookupError, LookupKind, LookupPage, LookupRequest, PageEnd};
pub use descriptor::{QueryDescriptor, QueryParseError, DEFAULT_TIME_FENCE};
pub use dnsdb::{DnsdbClient, DnsdbClientConfig};
pub use executor::{
    AttemptOutcome, QueryExecutor, QueryOutcome, QueryPolicy, QueryStatus, RetryState, Transition,
};
