//! Bibliography Resolver: resolves citation metadata by DOI from a
//! primary provider, falling back to a secondary provider only on a
//! non-`NotFound` primary failure. Deduplicates by normalized DOI before
//! rendering `.bib` output.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::BibliographyConfig;
use crate::error::RunnerError;
use crate::schema::normalize_doi;
use crate::types::{CitationRecord, CitationStatus, Verification, VerificationAttempt};

/// A metadata provider keyed by DOI. Implemented once per real provider
/// (Crossref, OpenAlex); tests use an in-memory fake.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve(&self, doi: &str) -> Result<ResolvedMetadata, RunnerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
}

pub struct BibliographyResolver {
    primary: Box<dyn MetadataProvider>,
    fallback: Box<dyn MetadataProvider>,
    config: BibliographyConfig,
}

pub fn is_fresh(record: &CitationRecord, now: DateTime<Utc>, max_age_hours: i64) -> bool {
    record
        .verification
        .as_ref()
        .and_then(|v| v.last_checked)
        .map(|last| now.signed_duration_since(last).num_hours() <= max_age_hours)
        .unwrap_or(false)
}

impl BibliographyResolver {
    pub fn new(primary: Box<dyn MetadataProvider>, fallback: Box<dyn MetadataProvider>, config: BibliographyConfig) -> Self {
        Self { primary, fallback, config }
    }

    /// Resolves a record if stale, merging resolved fields without
    /// overwriting fields a human has already edited (`manual_verification_required`
    /// records are left untouched).
    pub async fn refresh(&self, mut record: CitationRecord, now: DateTime<Utc>) -> CitationRecord {
        if record.manual_verification_required || is_fresh(&record, now, self.config.max_age_hours) {
            return record;
        }

        let doi = match record.identifiers.doi.clone() {
            Some(doi) => normalize_doi(&doi),
            None => return record,
        };

        let mut attempts = record.verification.clone().map(|v| v.attempts).unwrap_or_default();

        let (provider_used, resolved) = match self.primary.resolve(&doi).await {
            Ok(meta) => {
                attempts.push(VerificationAttempt {
                    provider: self.primary.name().to_string(),
                    ok: true,
                    checked_at: now,
                });
                (Some(self.primary.name().to_string()), Some(meta))
            }
            Err(RunnerError::NotFound(_)) => {
                attempts.push(VerificationAttempt {
                    provider: self.primary.name().to_string(),
                    ok: false,
                    checked_at: now,
                });
                (None, None)
            }
            Err(_) => {
                attempts.push(VerificationAttempt {
                    provider: self.primary.name().to_string(),
                    ok: false,
                    checked_at: now,
                });
                match self.fallback.resolve(&doi).await {
                    Ok(meta) => {
                        attempts.push(VerificationAttempt {
                            provider: self.fallback.name().to_string(),
                            ok: true,
                            checked_at: now,
                        });
                        (Some(self.fallback.name().to_string()), Some(meta))
                    }
                    Err(_) => {
                        attempts.push(VerificationAttempt {
                            provider: self.fallback.name().to_string(),
                            ok: false,
                            checked_at: now,
                        });
                        (None, None)
                    }
                }
            }
        };

        if let Some(meta) = resolved {
            if let Some(title) = meta.title {
                record.title = title;
            }
            if !meta.authors.is_empty() {
                record.authors = meta.authors;
            }
            if let Some(year) = meta.year {
                record.year = year;
            }
            record.status = CitationStatus::Verified;
        }

        record.verification = Some(Verification {
            provider_used,
            last_checked: Some(now),
            attempts,
        });

        record
    }
}

/// Deduplicates citation records by normalized DOI. Records without a DOI
/// always survive. Returns `(survivors, dropped_key -> survivor_key)`.
pub fn dedup_by_doi(records: Vec<CitationRecord>) -> (Vec<CitationRecord>, HashMap<String, String>) {
    let mut seen_doi: HashMap<String, String> = HashMap::new();
    let mut dropped = HashMap::new();
    let mut survivors = Vec::new();

    for record in records {
        match record.identifiers.doi.as_ref().map(|d| normalize_doi(d)) {
            Some(doi) if seen_doi.contains_key(&doi) => {
                let survivor_key = seen_doi.get(&doi).unwrap().clone();
                dropped.insert(record.citation_key.clone(), survivor_key);
            }
            Some(doi) => {
                seen_doi.insert(doi, record.citation_key.clone());
                survivors.push(record);
            }
            None => survivors.push(record),
        }
    }

    (survivors, dropped)
}

/// Renders deduplicated records as `.bib` entries. Keys collide on
/// `<FirstAuthorLastName><year>`; a deterministic `a`, `b`, … suffix is
/// appended on collision.
pub fn render_bib(records: &[CitationRecord]) -> String {
    let mut used_keys: HashSet<String> = HashSet::new();
    let mut out = String::new();

    let mut sorted: Vec<&CitationRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.citation_key.cmp(&b.citation_key));

    for record in sorted {
        let base_key = bib_key_base(record);
        let key = dedupe_key(&base_key, &mut used_keys);

        out.push_str(&format!("@article{{{},\n", key));
        out.push_str(&format!("  title = {{{}}},\n", record.title));
        if !record.authors.is_empty() {
            out.push_str(&format!("  author = {{{}}},\n", record.authors.join(" and ")));
        }
        out.push_str(&format!("  year = {{{}}},\n", record.year));
        if let Some(doi) = &record.identifiers.doi {
            out.push_str(&format!("  doi = {{{}}},\n", normalize_doi(doi)));
        }
        out.push_str("}\n\n");
    }

    out
}

fn bib_key_base(record: &CitationRecord) -> String {
    let last_name = record
        .authors
        .first()
        .and_then(|a| a.split_whitespace().last())
        .unwrap_or("Unknown");
    format!("{}{}", last_name, record.year)
}

fn dedupe_key(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    for suffix in 'a'..='z' {
        let candidate = format!("{}{}", base, suffix);
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    format!("{}-{}", base, used.len())
}
