//! HTTP lookup client for a DNSDB-style streaming API
//!
//! Results arrive as newline-delimited JSON ("SAF"): `{"cond": ...}` lines
//! frame the stream and `{"obj": ...}` lines carry records. The final
//! condition decides how the page ended:
//!
//! | stream                                 | [`PageEnd`]   |
//! |----------------------------------------|---------------|
//! | `succeeded`                            | `Complete`    |
//! | `limited`                              | `Limited`     |
//! | `failed`, HTTP error, send error       | `Failed`      |
//! | malformed line, silent past the timeout | `Failed`     |
//! | no terminal condition, broken body     | `Truncated`   |
//!
//! The timeout bounds silence on the connection, never the length of a
//! stream that keeps delivering lines.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{LookupClient, LookupError, LookupKind, LookupPage, LookupRequest, PageEnd};

// ============================================================================
// Client Constants
// ============================================================================

pub const DEFAULT_SERVER_URL: &str = "https://api.dnsdb.info";

/// Longest wait for a connection, the response headers, or the next chunk.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const API_KEY_HEADER: &str = "x-api-key";

const SAF_CONTENT_TYPE: &str = "application/x-ndjson";
const SWCLIENT: &str = "harvest";

#[derive(Debug, Clone)]
pub struct DnsdbClientConfig {
    pub server_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl DnsdbClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Streaming DNSDB API client
pub struct DnsdbClient {
    client: Client,
    base_url: String,
    /// Longest silence tolerated while waiting for headers or the next chunk.
    idle_timeout: Duration,
}

impl DnsdbClient {
    pub fn new(config: DnsdbClientConfig) -> Result<Self, LookupError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| LookupError::InvalidRequest("API key is not a valid header value".into()))?;
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        headers.insert(ACCEPT, HeaderValue::from_static(SAF_CONTENT_TYPE));

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            idle_timeout: config.timeout,
        })
    }

    /// Endpoint URL for a request, with path components percent-encoded.
    pub fn url_for(&self, request: &LookupRequest<'_>) -> String {
        let name = urlencoding::encode(&request.descriptor.name);
        let rrtype = urlencoding::encode(&request.descriptor.rrtype);
        match request.kind {
            LookupKind::RrsetName => {
                format!("{}/dnsdb/v2/lookup/rrset/name/{}/{}", self.base_url, name, rrtype)
            },
            LookupKind::FlexRegex => {
                format!("{}/dnsdb/v2/regex/rrnames/{}/{}", self.base_url, name, rrtype)
            },
        }
    }
}

#[async_trait]
impl LookupClient for DnsdbClient {
    async fn lookup(&self, request: LookupRequest<'_>) -> LookupPage {
        let url = self.url_for(&request);
        debug!(url = %url, offset = request.offset, "Sending lookup");

        let send = self
            .client
            .get(&url)
            .query(&[
                ("limit", "0".to_string()),
                ("offset", request.offset.to_string()),
                ("time_last_after", request.descriptor.time_fence.to_string()),
                ("swclient", SWCLIENT.to_string()),
            ])
            .send();

        let response = match tokio::time::timeout(self.idle_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return LookupPage::failed(LookupError::Transport(e)),
            Err(_) => {
                warn!(idle_timeout_secs = self.idle_timeout.as_secs(), "Lookup sent no response");
                return LookupPage::failed(LookupError::Idle(self.idle_timeout));
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = match tokio::time::timeout(self.idle_timeout, response.text()).await {
                Ok(Ok(body)) => body,
                _ => String::new(),
            };
            return LookupPage::failed(LookupError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let mut parser = SafParser::default();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, stream.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        idle_timeout_secs = self.idle_timeout.as_secs(),
                        records = parser.record_count(),
                        "Lookup stream went silent"
                    );
                    return parser.into_page(PageEnd::Failed(LookupError::Idle(self.idle_timeout)));
                },
            };
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = parser.feed(&bytes) {
                        return parser.into_page(PageEnd::Failed(e));
                    }
                    if parser.is_terminated() {
                        break;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Lookup stream broke mid-body");
                    return parser.into_page(PageEnd::Truncated);
                },
            }
        }

        parser.finish()
    }
}

// ============================================================================
// SAF stream parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct SafLine {
    cond: Option<String>,
    msg: Option<String>,
    obj: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Succeeded,
    Limited,
    Failed(String),
}

/// Incremental parser over arbitrary byte chunks.
#[derive(Debug, Default)]
pub(crate) struct SafParser {
    pending: Vec<u8>,
    records: Vec<Value>,
    terminal: Option<Terminal>,
}

impl SafParser {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<(), LookupError> {
        if self.terminal.is_some() {
            return Ok(());
        }
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&line)?;
            if self.terminal.is_some() {
                self.pending.clear();
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }

    fn handle_line(&mut self, line: &[u8]) -> Result<(), LookupError> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let parsed: SafLine =
            serde_json::from_str(text).map_err(|e| LookupError::Malformed(e.to_string()))?;

        if let Some(obj) = parsed.obj {
            self.records.push(obj);
        }

        match parsed.cond.as_deref() {
            None | Some("begin") | Some("ongoing") => {},
            Some("succeeded") => self.terminal = Some(Terminal::Succeeded),
            Some("limited") => {
                debug!(msg = parsed.msg.as_deref().unwrap_or(""), "Result limit reached");
                self.terminal = Some(Terminal::Limited);
            },
            Some("failed") => {
                self.terminal = Some(Terminal::Failed(parsed.msg.unwrap_or_default()));
            },
            Some(other) => {
                return Err(LookupError::Malformed(format!("unknown condition {:?}", other)));
            },
        }
        Ok(())
    }

    /// End of stream: flush a trailing unterminated line and classify.
    pub(crate) fn finish(mut self) -> LookupPage {
        if self.terminal.is_none() && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            if let Err(e) = self.handle_line(&line) {
                return self.into_page(PageEnd::Failed(e));
            }
        }

        let end = match self.terminal.take() {
            Some(Terminal::Succeeded) => PageEnd::Complete,
            Some(Terminal::Limited) => PageEnd::Limited,
            Some(Terminal::Failed(msg)) => PageEnd::Failed(LookupError::Service(msg)),
            None => PageEnd::Truncated,
        };
        self.into_page(end)
    }

    fn into_page(self, end: PageEnd) -> LookupPage {
        LookupPage::new(self.records, end)
    }
}
