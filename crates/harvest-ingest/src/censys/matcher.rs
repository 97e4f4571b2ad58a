//! Target matching
//!
//! A target is a company plus a "generalized domain" pattern. A certificate
//! matches when the pattern is found anywhere in its `;`-joined names.

use harvest_common::{HarvestError, Result};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use super::extract::CertificateRecord;

pub const SEARCH_METHOD: &str = "domain_in_cn_san";

const COMPANY_COLUMN: &str = "Company_name";
const DOMAIN_COLUMN: &str = "generalized_domain";

#[derive(Debug, Clone)]
enum Pattern {
    Regex(Regex),
    Literal(String),
}

#[derive(Debug, Clone)]
pub struct Target {
    pub company: String,
    pub generalized_domain: String,
    pattern: Pattern,
}

impl Target {
    /// Compile `generalized_domain` as a regex, matching it literally if it
    /// is not a valid one.
    pub fn new(company: impl Into<String>, generalized_domain: impl Into<String>) -> Self {
        let generalized_domain = generalized_domain.into();
        let pattern = match Regex::new(&generalized_domain) {
            Ok(re) => Pattern::Regex(re),
            Err(e) => {
                warn!(
                    pattern = %generalized_domain,
                    error = %e,
                    "Invalid target pattern, matching it literally"
                );
                Pattern::Literal(generalized_domain.clone())
            },
        };
        Self {
            company: company.into(),
            generalized_domain,
            pattern,
        }
    }

    pub fn is_match(&self, names: &str) -> bool {
        match &self.pattern {
            Pattern::Regex(re) => re.is_match(names),
            Pattern::Literal(text) => names.contains(text.as_str()),
        }
    }
}

/// One output row: a matched certificate narrowed to a single name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainMatch {
    #[serde(flatten)]
    pub certificate: CertificateRecord,
    pub company: String,
    pub search_method: &'static str,
    pub generalized_domain: String,
    pub name: Option<String>,
}

/// The compiled target list, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct TargetList {
    targets: Vec<Target>,
}

impl TargetList {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Load `Company_name,generalized_domain` rows from a CSV file.
    ///
    /// Rows with an empty company or pattern are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::MissingInput(path.to_path_buf()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                HarvestError::config(format!(
                    "Target list {} has no {} column",
                    path.display(),
                    name
                ))
            })
        };
        let company_idx = column(COMPANY_COLUMN)?;
        let domain_idx = column(DOMAIN_COLUMN)?;

        let mut targets = Vec::new();
        let mut ignored = 0usize;
        for row in reader.records() {
            let row = row?;
            let company = row.get(company_idx).unwrap_or_default().trim();
            let domain = row.get(domain_idx).unwrap_or_default().trim();
            if company.is_empty() || domain.is_empty() {
                ignored += 1;
                continue;
            }
            targets.push(Target::new(company, domain));
        }

        info!(path = %path.display(), targets = targets.len(), ignored, "Loaded target list");
        Ok(Self { targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Match every certificate against every target, one row per
    /// certificate name. A certificate without names yields one row with
    /// `name: None`.
    pub fn match_certificates(&self, certificates: &[CertificateRecord]) -> Vec<DomainMatch> {
        let mut rows = Vec::new();
        for target in &self.targets {
            for cert in certificates.iter().filter(|c| target.is_match(&c.names)) {
                let row = |name: Option<String>| DomainMatch {
                    certificate: cert.clone(),
                    company: target.company.clone(),
                    search_method: SEARCH_METHOD,
                    generalized_domain: target.generalized_domain.clone(),
                    name,
                };
                if cert.split_names.is_empty() {
                    rows.push(row(None));
                } else {
                    rows.extend(cert.split_names.iter().map(|n| row(Some(n.clone()))));
                }
            }
        }
        rows
    }
}
