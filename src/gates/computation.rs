//! Computation gate: every `computed` claim's `metric_keys` must exist
//! in `outputs/metrics.json`.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::{ClaimKind, GateResult};

#[derive(Debug, Clone)]
pub struct ComputationGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
}

impl Default for ComputationGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
        }
    }
}

impl ComputationGateConfig {
    pub fn from_map(raw: &toml::value::Table) -> Self {
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            on_failure: OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingMetricClaim {
    pub claim_id: String,
    pub missing_metric_keys: Vec<String>,
}

pub fn evaluate(store: &ArtifactStore, config: &ComputationGateConfig) -> Result<GateResult, String> {
    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "computation".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[("failed_claims_total", json!(0))]),
        });
    }

    let claims_result = store.read_claims()?;
    let metrics_result = store.read_metrics()?;
    let known_metric_keys: HashSet<String> = metrics_result.items.iter().map(|m| m.metric_key.clone()).collect();

    let computed: Vec<_> = claims_result
        .items
        .iter()
        .filter(|c| c.kind == ClaimKind::Computed)
        .collect();

    let mut failed = Vec::new();
    for claim in &computed {
        let missing: Vec<String> = claim
            .metric_keys
            .iter()
            .filter(|k| !known_metric_keys.contains(*k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            failed.push(MissingMetricClaim {
                claim_id: claim.claim_id.clone(),
                missing_metric_keys: missing,
            });
        }
    }

    let has_problem = !failed.is_empty();
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("failed_claims_total".to_string(), json!(failed.len()));
    counters.insert("computed_claims_total".to_string(), json!(computed.len()));
    counters.insert("claims_invalid_items".to_string(), json!(claims_result.invalid_count));
    counters.insert("metrics_invalid_items".to_string(), json!(metrics_result.invalid_count));

    let result = GateResult {
        gate_name: "computation".to_string(),
        enabled: true,
        ok,
        action,
        reports: failed.iter().map(|c| serde_json::to_value(c).unwrap()).collect(),
        counters,
    };

    store.write_gate_report("computation", &result)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimRecord, GateAction, Metric};
    use chrono::Utc;

    fn claim(id: &str, metric_keys: Vec<&str>) -> ClaimRecord {
        ClaimRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            claim_id: id.into(),
            kind: ClaimKind::Computed,
            statement: "x".into(),
            citation_keys: vec![],
            evidence_ids: vec![],
            metric_keys: metric_keys.into_iter().map(String::from).collect(),
        }
    }

    fn metric(key: &str) -> Metric {
        Metric {
            schema_version: "1".into(),
            created_at: Utc::now(),
            metric_key: key.into(),
            name: "n".into(),
            value: 1.0,
            unit: None,
        }
    }

    #[test]
    fn known_metric_key_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.append_claims(vec![claim("c1", vec!["m1"])]).unwrap();
        store.append_metrics(vec![metric("m1")]).unwrap();

        let config = ComputationGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }

    #[test]
    fn missing_metric_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.append_claims(vec![claim("c1", vec!["missing"])]).unwrap();

        let config = ComputationGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Block);
        assert_eq!(result.counters["failed_claims_total"], json!(1));
    }
}
