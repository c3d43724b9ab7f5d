//! Evidence gate: for each source directory, requires `evidence.json` to
//! hold at least `min_items_per_source` valid `EvidenceItem`s.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::GateResult;

#[derive(Debug, Clone)]
pub struct EvidenceGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
    pub min_items_per_source: usize,
}

impl Default for EvidenceGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
            min_items_per_source: 1,
        }
    }
}

impl EvidenceGateConfig {
    pub fn from_map(raw: &toml::value::Table) -> Self {
        let defaults = Self::default();
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            on_failure: OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str())),
            min_items_per_source: raw
                .get("min_items_per_source")
                .and_then(|v| v.as_integer())
                .map(|n| n.max(0) as usize)
                .unwrap_or(defaults.min_items_per_source),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEvidenceReport {
    pub source_id: String,
    pub valid_items: usize,
    pub invalid_items: usize,
    pub ok: bool,
}

pub fn evaluate(store: &ArtifactStore, config: &EvidenceGateConfig) -> Result<GateResult, String> {
    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "evidence".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[("sources_checked_total", json!(0))]),
        });
    }

    let source_ids = store.list_source_ids()?;
    let mut reports = Vec::new();
    let mut failing = 0usize;
    let mut total_valid = 0usize;
    let mut total_invalid = 0usize;

    for source_id in &source_ids {
        let result = store.read_evidence_items(source_id)?;
        let valid_items = result.items.len();
        let invalid_items = result.invalid_count;
        total_valid += valid_items;
        total_invalid += invalid_items;
        let ok = valid_items >= config.min_items_per_source;
        if !ok {
            failing += 1;
        }
        reports.push(SourceEvidenceReport {
            source_id: source_id.clone(),
            valid_items,
            invalid_items,
            ok,
        });
    }

    let has_problem = failing > 0;
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("sources_checked_total".to_string(), json!(source_ids.len()));
    counters.insert("sources_failing_total".to_string(), json!(failing));
    counters.insert("total_evidence_items".to_string(), json!(total_valid));
    counters.insert("evidence_invalid_items".to_string(), json!(total_invalid));

    let result = GateResult {
        gate_name: "evidence".to_string(),
        enabled: true,
        ok,
        action,
        reports: reports.iter().map(|r| serde_json::to_value(r).unwrap()).collect(),
        counters,
    };

    store.write_gate_report("evidence", &result)?;

    Ok(result)
}
