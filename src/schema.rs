//! Structural and semantic validation of on-disk record types. Pure
//! functions only — no I/O, no external calls.

use crate::types::{ClaimRecord, CitationRecord, EvidenceItem, Metric};

pub fn is_valid_evidence_item(item: &EvidenceItem) -> bool {
    validate_evidence_item(item).is_ok()
}

pub fn validate_evidence_item(item: &EvidenceItem) -> Result<(), String> {
    if item.evidence_id.trim().is_empty() {
        return Err("evidence_id must not be empty".to_string());
    }
    if item.source_id.trim().is_empty() {
        return Err("source_id must not be empty".to_string());
    }
    if item.excerpt.trim().is_empty() {
        return Err("excerpt must not be empty".to_string());
    }
    Ok(())
}

pub fn is_valid_claim_record(claim: &ClaimRecord) -> bool {
    validate_claim_record(claim).is_ok()
}

pub fn validate_claim_record(claim: &ClaimRecord) -> Result<(), String> {
    if claim.claim_id.trim().is_empty() {
        return Err("claim_id must not be empty".to_string());
    }
    if claim.statement.trim().is_empty() {
        return Err("statement must not be empty".to_string());
    }
    if !claim.satisfies_kind_invariant() {
        return Err(format!(
            "claim '{}' of kind {:?} does not satisfy its evidence/metric invariant",
            claim.claim_id, claim.kind
        ));
    }
    Ok(())
}

pub fn is_valid_metric(metric: &Metric) -> bool {
    validate_metric(metric).is_ok()
}

pub fn validate_metric(metric: &Metric) -> Result<(), String> {
    if metric.metric_key.trim().is_empty() {
        return Err("metric_key must not be empty".to_string());
    }
    if metric.name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    Ok(())
}

pub fn is_valid_citation_record(citation: &CitationRecord) -> bool {
    validate_citation_record(citation).is_ok()
}

pub fn validate_citation_record(citation: &CitationRecord) -> Result<(), String> {
    if citation.citation_key.trim().is_empty() {
        return Err("citation_key must not be empty".to_string());
    }
    if citation.title.trim().is_empty() {
        return Err("title must not be empty".to_string());
    }
    Ok(())
}

/// Normalize a DOI: lowercase, strip a leading `doi:` prefix, strip a
/// leading `https://doi.org/` (or `http://`) prefix.
///
/// Idempotent: `normalize_doi(normalize_doi(x)) == normalize_doi(x)`.
pub fn normalize_doi(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();

    for prefix in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped.to_string();
            break;
        }
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_doi_strips_known_prefixes() {
        assert_eq!(normalize_doi("10.1234/abcd"), "10.1234/abcd");
        assert_eq!(normalize_doi("DOI:10.1234/ABCD"), "10.1234/abcd");
        assert_eq!(
            normalize_doi("https://doi.org/10.1234/abcd"),
            "10.1234/abcd"
        );
    }

    #[test]
    fn normalize_doi_is_idempotent() {
        let once = normalize_doi("https://doi.org/10.1234/ABCD");
        let twice = normalize_doi(&once);
        assert_eq!(once, twice);
    }
}
