//! Pipeline Orchestrator: drives one run through
//! `Initializing -> Purging -> (Running[i] -> Gating[i])* -> Reporting ->
//! Terminal{Success|Degraded|Failed}`. Carries over the shutdown-monitor +
//! cancellation-token idiom and the "drain outstanding work, then write
//! final state before exit" discipline from the teacher's scheduler loop.

use std::path::Path;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::executor;
use crate::gates::{self, OnFailure};
use crate::report::{self, DegradationRecord, RunResult};
use crate::store::ArtifactStore;
use crate::types::{GateAction, GateResult, PhaseResult};
use crate::worklog;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Degraded,
    Failed,
}

pub struct PipelineRun {
    pub outcome: PipelineOutcome,
    pub run_result: RunResult,
}

/// Deletes `__pycache__` directories and `.pyc` files under `root`,
/// recursively. Best-effort — a single unreadable entry does not abort
/// the sweep.
fn purge_bytecode_caches(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some("__pycache__") {
                let _ = std::fs::remove_dir_all(&path);
            } else {
                purge_bytecode_caches(&path);
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("pyc") {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Clears `temp/`, archives a non-empty `outputs/` to
/// `archives/outputs_archive_<utc_ts>/`, and recreates an empty `outputs/`.
/// Also sweeps bytecode caches from the repository root and project folder.
pub fn purge(project_folder: &Path) -> Result<(), String> {
    purge_bytecode_caches(project_folder);

    let temp_dir = project_folder.join("temp");
    if temp_dir.exists() {
        std::fs::remove_dir_all(&temp_dir).map_err(|e| format!("failed to clear {}: {}", temp_dir.display(), e))?;
    }
    std::fs::create_dir_all(&temp_dir).map_err(|e| format!("failed to recreate {}: {}", temp_dir.display(), e))?;

    let outputs_dir = project_folder.join("outputs");
    let outputs_nonempty = outputs_dir
        .read_dir()
        .map(|mut d| d.next().is_some())
        .unwrap_or(false);
    if outputs_nonempty {
        let archive_dir = project_folder
            .join("archives")
            .join(format!("outputs_archive_{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
        std::fs::create_dir_all(archive_dir.parent().unwrap())
            .map_err(|e| format!("failed to create archives dir: {}", e))?;
        std::fs::rename(&outputs_dir, &archive_dir).map_err(|e| format!("failed to archive outputs: {}", e))?;
    }
    std::fs::create_dir_all(&outputs_dir).map_err(|e| format!("failed to recreate {}: {}", outputs_dir.display(), e))?;

    Ok(())
}

/// Which gates are expected to have their inputs ready once a given phase
/// completes. A gate run before its inputs exist would only ever report
/// "nothing found" noise, so gating is keyed to the phase that produces
/// the gate's subject matter.
fn gates_for_phase(phase_id: &str) -> &'static [&'static str] {
    match phase_id {
        "intake" => &["evidence"],
        "literature" => &["literature"],
        "gap_resolution" => &["claim_evidence", "computation"],
        "writing_review" => &["citation_accuracy"],
        "assembly" => &["analysis"],
        _ => &[],
    }
}

fn run_gate(name: &str, store: &ArtifactStore, config: &RunnerConfig) -> Result<GateResult, String> {
    match name {
        "evidence" => gates::evidence::evaluate(store, &gates::evidence::EvidenceGateConfig::from_map(&config.gates.evidence)),
        "citation_accuracy" => gates::citation_accuracy::evaluate(
            store,
            &gates::citation_accuracy::CitationAccuracyGateConfig::from_map(&config.gates.citation_accuracy),
        ),
        "computation" => {
            gates::computation::evaluate(store, &gates::computation::ComputationGateConfig::from_map(&config.gates.computation))
        }
        "claim_evidence" => gates::claim_evidence::evaluate(
            store,
            &gates::claim_evidence::ClaimEvidenceGateConfig::from_map(&config.gates.claim_evidence),
        ),
        "literature" => gates::literature::evaluate(
            store,
            &gates::literature::LiteratureGateConfig::from_map(&config.gates.literature),
            Utc::now(),
        ),
        "analysis" => gates::analysis::evaluate(store, &gates::analysis::AnalysisGateConfig::from_map(&config.gates.analysis)),
        _ => Err(format!("unknown gate '{}'", name)),
    }
}

fn run_gates_for_phase(phase_id: &str, store: &ArtifactStore, config: &RunnerConfig) -> Vec<GateResult> {
    gates_for_phase(phase_id)
        .iter()
        .filter_map(|name| match run_gate(name, store, config) {
            Ok(result) => Some(result),
            Err(err) => {
                log_warn!("gate '{}' failed to run: {}", name, err);
                None
            }
        })
        .collect()
}

fn dry_run_result(phase: &crate::config::PhaseConfig) -> PhaseResult {
    PhaseResult {
        phase_id: phase.id.clone(),
        phase_name: phase.name.clone(),
        success: true,
        exit_code: 0,
        execution_time: 0.0,
        degraded: false,
        degradation_reasons: vec![],
        error_count: 0,
        warning_count: 0,
        critical_count: 0,
    }
}

/// Runs the full pipeline against `project_folder` and always leaves a
/// schema-valid `autonomous_run_result.json` / `degradation_summary.json`
/// pair behind, even on early catastrophic failure.
pub async fn run_pipeline(
    config: &RunnerConfig,
    project_folder: &Path,
    run_id: String,
    skip_purge: bool,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<PipelineRun, String> {
    let started_at = Utc::now();
    let store = ArtifactStore::new(project_folder);
    let logs_dir = project_folder.join("logs");
    let log_path = worklog::log_path(&logs_dir, started_at);

    if skip_purge {
        log_info!("Skipping purge phase (--skip-purge).");
    } else if dry_run {
        log_info!("[dry-run] would purge temp/ and rotate outputs/");
    } else {
        purge(project_folder)?;
    }

    let mut phases: Vec<PhaseResult> = Vec::new();
    let mut degradation_records: Vec<DegradationRecord> = Vec::new();
    let mut critical_failure = false;

    for phase in &config.project.phases {
        if cancel.is_cancelled() {
            log_warn!("shutdown requested, halting before phase '{}'", phase.id);
            break;
        }

        let result = if dry_run {
            log_info!("[dry-run] would execute phase '{}'", phase.id);
            dry_run_result(phase)
        } else {
            let timeout = std::time::Duration::from_secs(config.execution.phase_timeout_seconds);
            executor::execute_phase(phase, project_folder, timeout).await
        };

        worklog::append_line(
            &log_path,
            &format!("phase {} finished: success={} degraded={}", phase.id, result.success, result.degraded),
        )?;

        for reason in &result.degradation_reasons {
            degradation_records.push(DegradationRecord { phase_id: phase.id.clone(), reason: reason.clone() });
            worklog::append_remedy(&logs_dir, &phase.id, reason)?;
        }

        let phase_success = result.success;
        phases.push(result);

        if !phase_success && phase.critical {
            log_warn!("critical phase '{}' failed, halting run", phase.id);
            critical_failure = true;
            break;
        }

        if !dry_run {
            let gate_results = run_gates_for_phase(&phase.id, &store, config);
            for gate_result in &gate_results {
                store.write_gate_report(&gate_result.gate_name, gate_result)?;
                if gate_result.action == GateAction::Block {
                    log_warn!("gate '{}' blocked after phase '{}'", gate_result.gate_name, phase.id);
                    critical_failure = true;
                }
            }
            if critical_failure {
                break;
            }
        }
    }

    let finished_at = Utc::now();
    let total_phases = config.project.phases.len();
    let successful_phases = phases.iter().filter(|p| p.success).count();
    let degraded_phases = phases.iter().filter(|p| p.degraded).count();

    let outcome = if critical_failure {
        PipelineOutcome::Failed
    } else if successful_phases == total_phases && degraded_phases == 0 {
        PipelineOutcome::Success
    } else if total_phases > 0 && (successful_phases as f64) >= (total_phases as f64) / 2.0 {
        PipelineOutcome::Degraded
    } else {
        PipelineOutcome::Failed
    };

    let evidence_items_count = report::count_evidence_items(&store);
    let readiness_score = report::read_readiness_score(project_folder);
    let degradation_summary = report::build_degradation_summary(degradation_records.clone());

    let run_result = RunResult {
        run_id,
        project_folder: project_folder.display().to_string(),
        started_at,
        finished_at,
        total_execution_time: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        overall_success: matches!(outcome, PipelineOutcome::Success),
        phases,
        evidence_items_count,
        readiness_score,
        degradation_summary: degradation_records,
    };

    report::write_run_artifacts(&store, &run_result, &degradation_summary)?;
    worklog::append_line(&log_path, &report::success_matrix(&run_result))?;

    Ok(PipelineRun { outcome, run_result })
}
