//! Reporting: success matrix, degradation summary, readiness aggregator.
//! Generalizes the teacher's append-only worklog writer to also emit the
//! machine-readable `autonomous_run_result.json` and `degradation_summary.json`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::ArtifactStore;
use crate::types::PhaseResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradationRecord {
    pub phase_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradationCounts {
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradationSummary {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub counts: DegradationCounts,
    pub records: Vec<DegradationRecord>,
}

/// Builds a schema-valid summary even when `records` is empty — an early
/// catastrophic failure must still leave a valid summary behind.
pub fn build_degradation_summary(records: Vec<DegradationRecord>) -> DegradationSummary {
    DegradationSummary {
        schema_version: "1".to_string(),
        created_at: Utc::now(),
        counts: DegradationCounts { total: records.len() },
        records,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub project_folder: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_execution_time: f64,
    pub overall_success: bool,
    pub phases: Vec<PhaseResult>,
    pub evidence_items_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_score: Option<f64>,
    pub degradation_summary: Vec<DegradationRecord>,
}

/// Counts every evidence item on disk across all sources, valid or not —
/// this is a raw tally of `Σ |evidence.json|`, not a validity check.
pub fn count_evidence_items(store: &ArtifactStore) -> usize {
    let Ok(source_ids) = store.list_source_ids() else { return 0 };
    source_ids
        .iter()
        .filter_map(|id| store.read_evidence_items(id).ok())
        .map(|result| result.items.len() + result.invalid_count)
        .sum()
}

#[derive(Deserialize)]
struct ReadinessReport {
    score: f64,
}

/// Reads a readiness score from the first candidate path that exists and
/// parses. Returns `None` if no candidate is present or parseable —
/// readiness reporting is a peripheral producer, not a hard dependency.
pub fn read_readiness_score(project_folder: &Path) -> Option<f64> {
    let candidates = [
        project_folder.join("outputs/readiness_report.json"),
        project_folder.join("readiness_report.json"),
        project_folder.join("paper/readiness_report.json"),
    ];
    for candidate in candidates {
        if let Ok(contents) = std::fs::read_to_string(&candidate) {
            if let Ok(report) = serde_json::from_str::<ReadinessReport>(&contents) {
                return Some(report.score);
            }
        }
    }
    None
}

/// Writes `outputs/autonomous_run_result.json` and
/// `outputs/degradation_summary.json` atomically via the Artifact Store.
pub fn write_run_artifacts(store: &ArtifactStore, run_result: &RunResult, summary: &DegradationSummary) -> Result<(), String> {
    store.write_json("outputs/autonomous_run_result.json", run_result)?;
    store.write_json("outputs/degradation_summary.json", summary)
}

/// Renders a plain-text, one-screen success matrix: one line per phase plus
/// a trailing overall-outcome line.
pub fn success_matrix(run_result: &RunResult) -> String {
    let mut out = String::new();
    out.push_str("PHASE RESULTS\n");
    for phase in &run_result.phases {
        let mark = if phase.success && !phase.degraded {
            "PASS"
        } else if phase.success && phase.degraded {
            "DEGRADED"
        } else {
            "FAIL"
        };
        out.push_str(&format!(
            "  [{}] {} ({:.2}s, errors={}, warnings={}, critical={})\n",
            mark, phase.phase_name, phase.execution_time, phase.error_count, phase.warning_count, phase.critical_count
        ));
    }
    out.push_str(&format!(
        "\nOverall: {}\n",
        if run_result.overall_success { "SUCCESS" } else { "FAILED/DEGRADED" }
    ));
    out
}
