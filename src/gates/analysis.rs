//! Analysis gate: requires at least one recorded `Metric` when the
//! project's `has_data` flag is set.

use std::collections::BTreeMap;

use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::GateResult;

#[derive(Debug, Clone)]
pub struct AnalysisGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
}

impl Default for AnalysisGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
        }
    }
}

impl AnalysisGateConfig {
    pub fn from_map(raw: &toml::value::Table) -> Self {
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            on_failure: OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str())),
        }
    }
}

pub fn evaluate(store: &ArtifactStore, config: &AnalysisGateConfig) -> Result<GateResult, String> {
    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "analysis".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[("metrics_total", json!(0))]),
        });
    }

    let metadata = store.read_project_metadata()?;
    let metrics_result = store.read_metrics()?;

    let has_data = metadata.as_ref().map(|m| m.has_data).unwrap_or(false);
    let has_problem = has_data && metrics_result.items.is_empty();
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("metrics_total".to_string(), json!(metrics_result.items.len()));
    counters.insert("metrics_invalid_items".to_string(), json!(metrics_result.invalid_count));
    counters.insert("project_has_data".to_string(), json!(has_data));

    let result = GateResult {
        gate_name: "analysis".to_string(),
        enabled: true,
        ok,
        action,
        reports: vec![],
        counters,
    };

    store.write_gate_report("analysis", &result)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateAction, Metric, PaperType, ProjectMetadata};
    use chrono::Utc;

    fn project(has_data: bool) -> ProjectMetadata {
        ProjectMetadata {
            schema_version: "1".into(),
            created_at: Utc::now(),
            id: "p1".into(),
            title: "t".into(),
            research_question: "q".into(),
            hypothesis: None,
            target_journal: "j".into(),
            paper_type: PaperType::Empirical,
            has_data,
            data_sources: vec![],
            methodology: None,
        }
    }

    #[test]
    fn has_data_with_metrics_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_json("project.json", &project(true)).unwrap();
        store
            .append_metrics(vec![Metric {
                schema_version: "1".into(),
                created_at: Utc::now(),
                metric_key: "m1".into(),
                name: "n".into(),
                value: 1.0,
                unit: None,
            }])
            .unwrap();

        let config = AnalysisGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }

    #[test]
    fn has_data_without_metrics_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_json("project.json", &project(true)).unwrap();

        let config = AnalysisGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Block);
    }

    #[test]
    fn no_data_without_metrics_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_json("project.json", &project(false)).unwrap();

        let config = AnalysisGateConfig {
            enabled: true,
            ..Default::default()
        };
        let result = evaluate(&store, &config).unwrap();
        assert_eq!(result.action, GateAction::Pass);
    }
}
