//! Claim-evidence gate: every `source_backed` claim must carry a
//! non-empty `evidence_ids`, each resolvable to a valid `EvidenceItem`.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::{ClaimKind, GateResult};

#[derive(Debug, Clone)]
pub struct ClaimEvidenceGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
}

impl Default for ClaimEvidenceGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
        }
    }
}

impl ClaimEvidenceGateConfig {
    pub fn from_map(raw: &toml::value::Table) -> Self {
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            on_failure: OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedClaim {
    pub claim_id: String,
    pub reason: String,
}

pub fn evaluate(store: &ArtifactStore, config: &ClaimEvidenceGateConfig) -> Result<GateResult, String> {
    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "claim_evidence".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[("failed_claims_total", json!(0))]),
        });
    }

    let claims_result = store.read_claims()?;

    let mut known_evidence_ids: HashSet<String> = HashSet::new();
    let mut evidence_invalid = 0usize;
    for source_id in store.list_source_ids()? {
        let result = store.read_evidence_items(&source_id)?;
        evidence_invalid += result.invalid_count;
        known_evidence_ids.extend(result.items.into_iter().map(|e| e.evidence_id));
    }

    let source_backed: Vec<_> = claims_result
        .items
        .iter()
        .filter(|c| c.kind == ClaimKind::SourceBacked)
        .collect();

    let mut failed = Vec::new();
    for claim in &source_backed {
        if claim.evidence_ids.is_empty() {
            failed.push(UnresolvedClaim {
                claim_id: claim.claim_id.clone(),
                reason: "empty_evidence_ids".to_string(),
            });
            continue;
        }
        let all_resolve = claim
            .evidence_ids
            .iter()
            .all(|id| known_evidence_ids.contains(id));
        if !all_resolve {
            failed.push(UnresolvedClaim {
                claim_id: claim.claim_id.clone(),
                reason: "evidence_id_unresolved".to_string(),
            });
        }
    }

    let has_problem = !failed.is_empty();
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("failed_claims_total".to_string(), json!(failed.len()));
    counters.insert("source_backed_claims_total".to_string(), json!(source_backed.len()));
    counters.insert("claims_invalid_items".to_string(), json!(claims_result.invalid_count));
    counters.insert("evidence_invalid_items".to_string(), json!(evidence_invalid));

    let result = GateResult {
        gate_name: "claim_evidence".to_string(),
        enabled: true,
        ok,
        action,
        reports: failed.iter().map(|c| serde_json::to_value(c).unwrap()).collect(),
        counters,
    };

    store.write_gate_report("claim_evidence", &result)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimRecord, EvidenceItem, EvidenceKind, GateAction, Locator, ParserInfo};
    use chrono::Utc;

    fn claim(id: &str, evidence_ids: Vec<&str>) -> ClaimRecord {
        ClaimRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            claim_id: id.into(),
            kind: ClaimKind::SourceBacked,
            statement: "x".into(),
            citation_keys: vec![],
            evidence_ids: evidence_ids.into_iter().map(String::from).collect(),
            metric_keys: vec![],
        }
    }

    fn evidence(id: &str) -> EvidenceItem {
        EvidenceItem {
            schema_version: "1".into(),
            created_at: Utc::now(),
            evidence_id: id.into(),
            source_id: "s1".into(),
            kind: EvidenceKind::Quote,
            locator: Locator {
                locator_type: "page".into(),
                value: "1".into(),
                span: None,
            },
            excerpt: "excerpt".into(),
            context: None,
            parser: ParserInfo { name: "pdf".into() },
        }
    }

    #[test]
    fn resolved_claim_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.append_claims(vec![claim("c1", vec!["e1"])]).unwrap();
        store.write_evidence_items("s1", vec![evidence("e1")]).unwrap();

        let config = ClaimEvidenceGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }

    #[test]
    fn empty_evidence_ids_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.append_claims(vec![claim("c1", vec![])]).unwrap();

        let config = ClaimEvidenceGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Block);
        assert_eq!(result.counters["failed_claims_total"], json!(1));
    }

    #[test]
    fn unresolved_evidence_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.append_claims(vec![claim("c1", vec!["missing"])]).unwrap();

        let config = ClaimEvidenceGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Block);
    }
}
