//! Certificate extraction from Censys host records
//!
//! Input files are gzip-compressed JSON lines, one host per line. Every
//! service with TLS leaf-certificate data yields one [`CertificateRecord`].

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct HostRecord {
    host_identifier: Option<HostIdentifier>,
    autonomous_system: Option<AutonomousSystem>,
    #[serde(default)]
    services: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct HostIdentifier {
    ipv4: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AutonomousSystem {
    asn: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Service {
    port: Option<u32>,
    service_name: Option<String>,
    snapshot_date: Option<String>,
    tls: Option<Tls>,
}

#[derive(Debug, Deserialize)]
struct Tls {
    certificates: Certificates,
}

#[derive(Debug, Deserialize)]
struct Certificates {
    leaf_data: LeafData,
}

#[derive(Debug, Deserialize)]
struct LeafData {
    issuer_dn: Option<String>,
    #[serde(default)]
    names: Vec<String>,
    subject_dn: Option<String>,
}

/// One TLS service on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateRecord {
    pub ip: String,
    pub asn: Option<Value>,
    pub issuer_dn: Option<String>,
    /// Certificate names joined with `;`.
    pub names: String,
    pub subject_dn: Option<String>,
    pub port: Option<u32>,
    pub service_name: Option<String>,
    pub snapshot_date: Option<String>,
    #[serde(skip)]
    pub split_names: Vec<String>,
}

/// Counters from reading one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub hosts: usize,
    pub malformed_hosts: usize,
    pub skipped_services: usize,
}

/// Extract the certificate records of one host line.
///
/// Returns `None` when the line is not a usable host record.
fn extract_host(line: &str, stats: &mut ExtractStats) -> Option<Vec<CertificateRecord>> {
    let host: HostRecord = match serde_json::from_str(line) {
        Ok(host) => host,
        Err(e) => {
            debug!(error = %e, "Skipping malformed host record");
            return None;
        },
    };

    let Some(ip) = host.host_identifier.and_then(|id| id.ipv4) else {
        debug!("Skipping host record without an IPv4 identifier");
        return None;
    };
    let asn = host.autonomous_system.and_then(|a| a.asn);

    let mut certificates = Vec::new();
    for raw in host.services {
        let service: Service = match serde_json::from_value(raw) {
            Ok(service) => service,
            Err(e) => {
                debug!(ip = %ip, error = %e, "Skipping malformed service");
                stats.skipped_services += 1;
                continue;
            },
        };
        let Some(tls) = service.tls else {
            continue;
        };
        let leaf = tls.certificates.leaf_data;

        certificates.push(CertificateRecord {
            ip: ip.clone(),
            asn: asn.clone(),
            issuer_dn: leaf.issuer_dn,
            names: leaf.names.join(";"),
            subject_dn: leaf.subject_dn,
            port: service.port,
            service_name: service.service_name,
            snapshot_date: service.snapshot_date,
            split_names: leaf.names,
        });
    }
    Some(certificates)
}

/// Read every certificate record from a gzip JSON-lines file.
///
/// Malformed lines and services are skipped; I/O and decompression errors
/// are returned.
pub fn read_certificates(path: &Path) -> io::Result<(Vec<CertificateRecord>, ExtractStats)> {
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    let mut stats = ExtractStats::default();
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match extract_host(&line, &mut stats) {
            Some(found) => {
                stats.hosts += 1;
                records.extend(found);
            },
            None => stats.malformed_hosts += 1,
        }
    }
    Ok((records, stats))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const HOST: &str = r#"{"host_identifier":{"ipv4":"192.0.2.10"},"autonomous_system":{"asn":64500},"services":[
        {"port":443,"service_name":"HTTP","snapshot_date":"2023-01-02","tls":{"certificates":{"leaf_data":{"issuer_dn":"CN=Test CA","names":["acme.com","www.acme.com"],"subject_dn":"CN=acme.com"}}}},
        {"port":22,"service_name":"SSH"},
        {"port":"not-a-port","tls":{}},
        {"port":8443,"tls":{"certificates":{}}}
    ]}"#;

    #[test]
    fn test_extract_host() {
        let mut stats = ExtractStats::default();
        let line = HOST.replace('\n', "");
        let records = extract_host(&line, &mut stats).unwrap();

        assert_eq!(records.len(), 1);
        let cert = &records[0];
        assert_eq!(cert.ip, "192.0.2.10");
        assert_eq!(cert.asn, Some(serde_json::json!(64500)));
        assert_eq!(cert.names, "acme.com;www.acme.com");
        assert_eq!(cert.split_names, vec!["acme.com", "www.acme.com"]);
        assert_eq!(cert.port, Some(443));
        assert_eq!(stats.skipped_services, 2);
    }

    #[test]
    fn test_host_without_ip_is_skipped() {
        let mut stats = ExtractStats::default();
        assert!(extract_host(r#"{"services":[]}"#, &mut stats).is_none());
        assert!(extract_host("{not json", &mut stats).is_none());
    }

    #[test]
    fn test_read_certificates_from_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        writeln!(encoder, "{}", HOST.replace('\n', "")).unwrap();
        writeln!(encoder).unwrap();
        writeln!(encoder, "garbage").unwrap();
        encoder.finish().unwrap();

        let (records, stats) = read_certificates(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(stats.hosts, 1);
        assert_eq!(stats.malformed_hosts, 1);
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(read_certificates(&path).is_err());
    }
}
