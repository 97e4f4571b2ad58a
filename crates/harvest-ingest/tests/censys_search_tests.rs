//! Censys certificate search, end to end over gzip host files

use anyhow::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use harvest_ingest::censys::run_search;
use harvest_ingest::config::CensysSearchConfig;
use harvest_ingest::pipeline::PoolConfig;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

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

fn host(ip: &str, names: &[&str]) -> Value {
    json!({
        "host_identifier": {"ipv4": ip},
        "autonomous_system": {"asn": 64500},
        "services": [{
            "port": 443,
            "service_name": "HTTP",
            "snapshot_date": "2023-01-02",
            "tls": {"certificates": {"leaf_data": {
                "issuer_dn": "CN=Test CA",
                "names": names,
                "subject_dn": format!("CN={}", names.first().copied().unwrap_or("none")),
            }}}
        }]
    })
}

fn write_hosts(path: &Path, hosts: &[Value]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    for host in hosts {
        writeln!(encoder, "{}", host).unwrap();
    }
    encoder.finish().unwrap();
}

fn read_rows(path: &Path) -> Vec<Value> {
    BufReader::new(GzDecoder::new(File::open(path).unwrap()))
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_matches_across_files() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let input_dir = dir.path().join("hosts");
    std::fs::create_dir(&input_dir)?;

    write_hosts(
        &input_dir.join("hosts-000.json.gz"),
        &[
            host("192.0.2.1", &["acme.com", "www.acme.com"]),
            host("192.0.2.2", &["unrelated.org"]),
        ],
    );
    write_hosts(
        &input_dir.join("hosts-001.json.gz"),
        &[host("192.0.2.3", &["mail.globex.net"])],
    );
    write_hosts(&input_dir.join("hosts-002.json.gz"), &[host("192.0.2.4", &["nobody.io"])]);
    // Not a host-record file, never queued.
    std::fs::write(input_dir.join("README.txt"), "ignored")?;

    let domain_list_path = dir.path().join("targets.csv");
    std::fs::write(
        &domain_list_path,
        "Company_name,generalized_domain\nAcme,acme\\.com\nGlobex,globex\n,orphan\n",
    )?;

    let output_path = dir.path().join("out/matches.json.gz");
    let config = CensysSearchConfig {
        input_dir,
        domain_list_path,
        output_path: output_path.clone(),
        pool: PoolConfig::default().with_workers(2),
    };
    config.validate()?;

    let report = run_search(config).await?;
    assert_eq!(report.jobs_queued, 3);
    assert_eq!(report.jobs_succeeded(), 3);
    // hosts-002 has no match, so only two results reach the writer.
    assert_eq!(report.writer.results_written, 2);

    let rows = read_rows(&output_path);
    assert_eq!(rows.len(), 3);

    let mut acme: Vec<&str> = rows
        .iter()
        .filter(|r| r["company"] == "Acme")
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    acme.sort_unstable();
    assert_eq!(acme, vec!["acme.com", "www.acme.com"]);

    let globex = rows.iter().find(|r| r["company"] == "Globex").unwrap();
    assert_eq!(globex["ip"], "192.0.2.3");
    assert_eq!(globex["names"], "mail.globex.net");
    assert_eq!(globex["search_method"], "domain_in_cn_san");
    assert_eq!(globex["generalized_domain"], "globex");
    assert_eq!(globex["asn"], 64500);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_file_fails_its_job_only() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let input_dir = dir.path().join("hosts");
    std::fs::create_dir(&input_dir)?;

    write_hosts(&input_dir.join("a.json.gz"), &[host("192.0.2.1", &["acme.com"])]);
    std::fs::write(input_dir.join("b.json.gz"), b"this is not gzip")?;

    let domain_list_path = dir.path().join("targets.csv");
    std::fs::write(&domain_list_path, "Company_name,generalized_domain\nAcme,acme\n")?;

    let output_path = dir.path().join("matches.json.gz");
    let report = run_search(CensysSearchConfig {
        input_dir,
        domain_list_path,
        output_path: output_path.clone(),
        pool: PoolConfig::default().with_workers(1),
    })
    .await?;

    assert_eq!(report.jobs_succeeded(), 1);
    assert_eq!(report.jobs_failed(), 1);
    assert_eq!(report.writer.sentinels, 1);
    assert_eq!(read_rows(&output_path).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_target_list_fails_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("matches.json.gz");

    let result = run_search(CensysSearchConfig {
        input_dir: dir.path().to_path_buf(),
        domain_list_path: dir.path().join("missing.csv"),
        output_path: output_path.clone(),
        pool: PoolConfig::default(),
    })
    .await;

    assert!(result.is_err());
    assert!(!output_path.exists());
}
