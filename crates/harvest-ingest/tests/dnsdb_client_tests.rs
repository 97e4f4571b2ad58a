//! DNSDB client tests against a mock HTTP server

use anyhow::Result;
use chrono::TimeZone;
use flate2::read::GzDecoder;
use harvest_ingest::config::{dnsdb_output_path, DnsdbQueryConfig};
use harvest_ingest::dnsdb::run_queries;
use harvest_ingest::pipeline::PoolConfig;
use harvest_ingest::query::{
    DnsdbClient, DnsdbClientConfig, LookupClient, LookupError, LookupKind, LookupPage,
    LookupRequest, PageEnd, QueryDescriptor, QueryExecutor, QueryPolicy, QueryStatus,
};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::Span;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,harvest_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn saf(lines: &[&str]) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

fn client_for(server: &MockServer) -> DnsdbClient {
    DnsdbClient::new(
        DnsdbClientConfig::new("test-key")
            .with_server_url(server.uri())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

/// Serve one chunked SAF response, writing each line after `gap`, then hold
/// the connection open for `hold` before finishing.
async fn drip_server(lines: Vec<String>, gap: Duration, hold: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: application/x-ndjson\r\n\
                  Transfer-Encoding: chunked\r\n\r\n",
            )
            .await
            .unwrap();
        for line in lines {
            tokio::time::sleep(gap).await;
            let data = format!("{}\n", line);
            let chunk = format!("{:x}\r\n{}\r\n", data.len(), data);
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        tokio::time::sleep(hold).await;
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    format!("http://{}", addr)
}

fn saf_lines(records: usize, terminal: Option<&str>) -> Vec<String> {
    let mut lines = vec![r#"{"cond":"begin"}"#.to_string()];
    lines.extend((0..records).map(|i| format!(r#"{{"obj":{{"rrname":"host{}.example.com."}}}}"#, i)));
    if let Some(cond) = terminal {
        lines.push(format!(r#"{{"cond":"{}"}}"#, cond));
    }
    lines
}

async fn lookup_once(server_url: String, timeout: Duration) -> LookupPage {
    let client = DnsdbClient::new(
        DnsdbClientConfig::new("key")
            .with_server_url(server_url)
            .with_timeout(timeout),
    )
    .unwrap();
    let descriptor = QueryDescriptor::parse("example.com/A", 0).unwrap();
    client
        .lookup(LookupRequest {
            descriptor: &descriptor,
            offset: 0,
            kind: LookupKind::RrsetName,
        })
        .await
}

#[tokio::test]
async fn test_slow_but_steady_stream_outlives_the_timeout() {
    init_tracing();
    // 8 lines, 300ms apart: the stream lasts well past the 1s timeout, but
    // no single gap does.
    let url = drip_server(
        saf_lines(6, Some("succeeded")),
        Duration::from_millis(300),
        Duration::ZERO,
    )
    .await;

    let page = lookup_once(url, Duration::from_secs(1)).await;

    assert!(matches!(page.end, PageEnd::Complete), "got {:?}", page.end);
    assert_eq!(page.records.len(), 6);
}

#[tokio::test]
async fn test_silent_stream_is_a_hard_failure() {
    init_tracing();
    let url = drip_server(saf_lines(2, None), Duration::from_millis(10), Duration::from_secs(5)).await;

    let page = lookup_once(url, Duration::from_millis(500)).await;

    assert!(matches!(page.end, PageEnd::Failed(LookupError::Idle(_))), "got {:?}", page.end);
    assert_eq!(page.records.len(), 2);
}

#[tokio::test]
async fn test_rrset_lookup_sends_expected_request() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dnsdb/v2/lookup/rrset/name/example.com/A"))
        .and(header("x-api-key", "test-key"))
        .and(query_param("limit", "0"))
        .and(query_param("offset", "0"))
        .and(query_param("time_last_after", "1609459200"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"obj":{"rrname":"example.com.","rrtype":"A","rdata":["192.0.2.1"]}}"#,
            r#"{"cond":"succeeded"}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let descriptor = QueryDescriptor::parse("example.com/A", 1_609_459_200).unwrap();
    let page = client
        .lookup(LookupRequest {
            descriptor: &descriptor,
            offset: 0,
            kind: LookupKind::RrsetName,
        })
        .await;

    assert!(matches!(page.end, PageEnd::Complete));
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0]["rdata"][0], "192.0.2.1");
}

#[tokio::test]
async fn test_http_error_is_a_hard_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Error: API key not valid"))
        .mount(&server)
        .await;

    let descriptor = QueryDescriptor::parse("example.com/A", 0).unwrap();
    let page = client_for(&server)
        .lookup(LookupRequest {
            descriptor: &descriptor,
            offset: 0,
            kind: LookupKind::RrsetName,
        })
        .await;

    match page.end {
        PageEnd::Failed(LookupError::Status { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "Error: API key not valid");
        },
        other => panic!("expected HTTP failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_a_hard_failure() {
    let client = DnsdbClient::new(
        DnsdbClientConfig::new("key")
            .with_server_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    let descriptor = QueryDescriptor::parse("example.com/A", 0).unwrap();

    let page = client
        .lookup(LookupRequest {
            descriptor: &descriptor,
            offset: 0,
            kind: LookupKind::RrsetName,
        })
        .await;
    assert!(matches!(page.end, PageEnd::Failed(LookupError::Transport(_))));
}

#[tokio::test]
async fn test_executor_walks_limited_pages_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    let base = "/dnsdb/v2/regex/rrnames/%5Eacme/A";

    Mock::given(method("GET"))
        .and(path(base))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"obj":{"rrname":"acme.com."}}"#,
            r#"{"obj":{"rrname":"www.acme.com."}}"#,
            r#"{"cond":"limited","msg":"Result limit reached"}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(base))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"obj":{"rrname":"mail.acme.com."}}"#,
            r#"{"cond":"succeeded"}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let executor = QueryExecutor::new(
        Arc::new(client_for(&server)),
        LookupKind::FlexRegex,
        QueryPolicy::default(),
    );
    let outcome = executor.execute("^acme/A", &Span::none()).await;

    assert_eq!(outcome.status, QueryStatus::Success);
    let names: Vec<_> = outcome
        .records
        .iter()
        .map(|r| r["rrname"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["acme.com.", "www.acme.com.", "mail.acme.com."]);
}

#[tokio::test]
async fn test_stream_without_terminator_is_retried_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"obj":{"rrname":"example.com."}}"#,
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let executor = QueryExecutor::new(
        Arc::new(client_for(&server)),
        LookupKind::RrsetName,
        QueryPolicy::default(),
    );
    let outcome = executor.execute("example.com/A", &Span::none()).await;

    assert_eq!(outcome.status, QueryStatus::RetryExhausted);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.records.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_query_batch_end_to_end() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dnsdb/v2/lookup/rrset/name/acme.com/A"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"obj":{"rrname":"acme.com.","rdata":["192.0.2.1"]}}"#,
            r#"{"obj":{"rrname":"acme.com.","rdata":["192.0.2.2"]}}"#,
            r#"{"cond":"succeeded"}"#,
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dnsdb/v2/lookup/rrset/name/globex.com/A"))
        .respond_with(ResponseTemplate::new(200).set_body_string(saf(&[
            r#"{"cond":"begin"}"#,
            r#"{"cond":"succeeded"}"#,
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("queries.csv");
    std::fs::write(
        &input_path,
        "company,domain_A_queries\nAcme,rrset/name/acme.com/A\nGlobex,globex.com/A\n",
    )?;
    let now = chrono::Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
    let output_path = dnsdb_output_path(&dir.path().join("out"), &input_path, Some("1"), now);

    let config = DnsdbQueryConfig {
        input_path,
        output_path: output_path.clone(),
        query_fields: vec!["domain_A_queries".to_string()],
        client: DnsdbClientConfig::new("test-key").with_server_url(server.uri()),
        policy: QueryPolicy::default(),
        pool: PoolConfig::default().with_workers(2),
    };

    let report = run_queries(config, LookupKind::RrsetName).await?;
    assert_eq!(report.jobs_succeeded(), 2);
    assert_eq!(report.writer.results_written, 1);

    assert!(output_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("queries_query_round_1_dnsdb_results.json.gz"));

    let rows: Vec<Value> = BufReader::new(GzDecoder::new(std::fs::File::open(&output_path)?))
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["company"] == "Acme"));
    Ok(())
}
