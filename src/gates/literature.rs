//! Literature gate: every claim carrying `citation_keys` must have at
//! least one verified, fresh citation among them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::{CitationRecord, CitationStatus, GateResult};

#[derive(Debug, Clone)]
pub struct LiteratureGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
    pub max_age_hours: i64,
}

impl Default for LiteratureGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
            max_age_hours: 24,
        }
    }
}

impl LiteratureGateConfig {
    pub fn from_map(raw: &toml::value::Table) -> Self {
        let defaults = Self::default();
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            on_failure: OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str())),
            max_age_hours: raw
                .get("max_age_hours")
                .and_then(|v| v.as_integer())
                .unwrap_or(defaults.max_age_hours),
        }
    }
}

/// A citation is fresh iff `now - last_checked <= max_age_hours`.
pub fn is_fresh(citation: &CitationRecord, now: DateTime<Utc>, max_age_hours: i64) -> bool {
    let Some(verification) = &citation.verification else {
        return false;
    };
    let Some(last_checked) = verification.last_checked else {
        return false;
    };
    now.signed_duration_since(last_checked).num_hours() <= max_age_hours
}

fn is_verified(citation: &CitationRecord, now: DateTime<Utc>, max_age_hours: i64) -> bool {
    citation.status == CitationStatus::Verified && is_fresh(citation, now, max_age_hours)
}

#[derive(Debug, Clone, Serialize)]
pub struct UnverifiedClaim {
    pub claim_id: String,
    pub citation_keys: Vec<String>,
}

pub fn evaluate(store: &ArtifactStore, config: &LiteratureGateConfig, now: DateTime<Utc>) -> Result<GateResult, String> {
    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "literature".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[("failed_claims_total", json!(0))]),
        });
    }

    let claims_result = store.read_claims()?;
    let citations_result = store.list_citations()?;
    let citations_by_key: HashMap<String, &CitationRecord> = citations_result
        .items
        .iter()
        .map(|c| (c.citation_key.clone(), c))
        .collect();

    let with_citations: Vec<_> = claims_result
        .items
        .iter()
        .filter(|c| !c.citation_keys.is_empty())
        .collect();

    let mut failed = Vec::new();
    for claim in &with_citations {
        let has_verified = claim.citation_keys.iter().any(|key| {
            citations_by_key
                .get(key)
                .map(|c| is_verified(c, now, config.max_age_hours))
                .unwrap_or(false)
        });
        if !has_verified {
            failed.push(UnverifiedClaim {
                claim_id: claim.claim_id.clone(),
                citation_keys: claim.citation_keys.clone(),
            });
        }
    }

    let has_problem = !failed.is_empty();
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("failed_claims_total".to_string(), json!(failed.len()));
    counters.insert("claims_with_citations_total".to_string(), json!(with_citations.len()));
    counters.insert("citations_total".to_string(), json!(citations_result.items.len()));
    counters.insert("citations_invalid_items".to_string(), json!(citations_result.invalid_count));

    let result = GateResult {
        gate_name: "literature".to_string(),
        enabled: true,
        ok,
        action,
        reports: failed.iter().map(|c| serde_json::to_value(c).unwrap()).collect(),
        counters,
    };

    store.write_gate_report("literature", &result)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimKind, ClaimRecord, CitationIdentifiers, GateAction, Verification, VerificationAttempt};
    use chrono::Duration;

    fn claim(id: &str, citation_keys: Vec<&str>) -> ClaimRecord {
        ClaimRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            claim_id: id.into(),
            kind: ClaimKind::SourceBacked,
            statement: "x".into(),
            citation_keys: citation_keys.into_iter().map(String::from).collect(),
            evidence_ids: vec!["e1".into()],
            metric_keys: vec![],
        }
    }

    fn citation(key: &str, status: CitationStatus, last_checked: Option<DateTime<Utc>>) -> CitationRecord {
        CitationRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            citation_key: key.into(),
            title: "t".into(),
            authors: vec![],
            year: 2020,
            identifiers: CitationIdentifiers::default(),
            status,
            verification: last_checked.map(|lc| Verification {
                provider_used: Some("crossref".into()),
                last_checked: Some(lc),
                attempts: vec![VerificationAttempt {
                    provider: "crossref".into(),
                    ok: true,
                    checked_at: lc,
                }],
            }),
            manual_verification_required: false,
            relevance_score: None,
        }
    }

    #[test]
    fn fresh_verified_citation_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let now = Utc::now();
        store.append_claims(vec![claim("c1", vec!["k1"])]).unwrap();
        store
            .write_citations(vec![citation("k1", CitationStatus::Verified, Some(now))])
            .unwrap();

        let config = LiteratureGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config, now).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }

    #[test]
    fn stale_verification_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let now = Utc::now();
        let stale = now - Duration::hours(48);
        store.append_claims(vec![claim("c1", vec!["k1"])]).unwrap();
        store
            .write_citations(vec![citation("k1", CitationStatus::Verified, Some(stale))])
            .unwrap();

        let config = LiteratureGateConfig {
            enabled: true,
            max_age_hours: 24,
            ..Default::default()
        };
        let result = evaluate(&store, &config, now).unwrap();
        assert_eq!(result.action, GateAction::Block);
    }

    #[test]
    fn unverified_status_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let now = Utc::now();
        store.append_claims(vec![claim("c1", vec!["k1"])]).unwrap();
        store
            .write_citations(vec![citation("k1", CitationStatus::Unverified, Some(now))])
            .unwrap();

        let config = LiteratureGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config, now).unwrap();
        assert_eq!(result.action, GateAction::Block);
    }

    #[test]
    fn claims_without_citation_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let now = Utc::now();
        store.append_claims(vec![claim("c1", vec![])]).unwrap();

        let config = LiteratureGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config, now).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }
}
