//! End-to-end exercises of `run_pipeline` against real child-process phase
//! scripts, not just the in-crate unit tests around its pieces.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use research_runner::config::{PhaseConfig, RunnerConfig};
use research_runner::orchestrator::{purge, run_pipeline, PipelineOutcome};

/// Writes an executable shell script at `project_folder/entry` with the
/// given body. Phases are invoked as `entry_path <project_folder>`, exactly
/// like `executor::execute_phase` spawns them.
fn write_phase_script(project_folder: &Path, entry: &str, body: &str) {
    let path = project_folder.join(entry);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

fn phase(id: &str, entry: &str, critical: bool) -> PhaseConfig {
    PhaseConfig {
        id: id.to_string(),
        name: id.to_string(),
        entry: entry.to_string(),
        critical,
    }
}

fn bare_config(phases: Vec<PhaseConfig>) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.project.phases = phases;
    config
}

#[tokio::test]
async fn successful_two_phase_run_produces_terminal_success() {
    let dir = TempDir::new().unwrap();
    write_phase_script(dir.path(), "phases/one.sh", "exit 0");
    write_phase_script(dir.path(), "phases/two.sh", "exit 0");

    let config = bare_config(vec![
        phase("one", "phases/one.sh", false),
        phase("two", "phases/two.sh", false),
    ]);

    let run = run_pipeline(&config, dir.path(), "run-1".to_string(), true, false, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(run.outcome, PipelineOutcome::Success));
    assert!(run.run_result.overall_success);
    assert_eq!(run.run_result.phases.len(), 2);
    assert!(run.run_result.phases.iter().all(|p| p.success));
    assert!(dir.path().join("outputs/autonomous_run_result.json").exists());
    assert!(dir.path().join("outputs/degradation_summary.json").exists());
}

#[tokio::test]
async fn non_critical_phase_failure_continues_and_degrades_outcome() {
    let dir = TempDir::new().unwrap();
    write_phase_script(dir.path(), "phases/one.sh", "exit 1");
    write_phase_script(dir.path(), "phases/two.sh", "exit 0");

    let config = bare_config(vec![
        phase("one", "phases/one.sh", false),
        phase("two", "phases/two.sh", false),
    ]);

    let run = run_pipeline(&config, dir.path(), "run-1".to_string(), true, false, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(run.outcome, PipelineOutcome::Degraded));
    assert!(!run.run_result.overall_success);
    assert_eq!(run.run_result.phases.len(), 2, "the non-critical failure must not halt the run");
    assert!(!run.run_result.phases[0].success);
    assert!(run.run_result.phases[1].success);
}

#[tokio::test]
async fn critical_phase_failure_halts_before_the_next_phase_runs() {
    let dir = TempDir::new().unwrap();
    write_phase_script(dir.path(), "phases/one.sh", "exit 1");
    let marker = dir.path().join("outputs/two_ran.marker");
    write_phase_script(
        dir.path(),
        "phases/two.sh",
        &format!("touch {}", marker.display()),
    );

    let config = bare_config(vec![
        phase("one", "phases/one.sh", true),
        phase("two", "phases/two.sh", false),
    ]);

    let run = run_pipeline(&config, dir.path(), "run-1".to_string(), true, false, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(run.outcome, PipelineOutcome::Failed));
    assert_eq!(run.run_result.phases.len(), 1, "phase two must never have been scheduled");
    assert!(!marker.exists());
    assert!(dir.path().join("outputs/autonomous_run_result.json").exists());
}

#[tokio::test]
async fn phase_exceeding_its_timeout_is_recorded_as_failed_but_non_critical_run_continues() {
    let dir = TempDir::new().unwrap();
    write_phase_script(dir.path(), "phases/one.sh", "sleep 5");
    write_phase_script(dir.path(), "phases/two.sh", "exit 0");

    let mut config = bare_config(vec![
        phase("one", "phases/one.sh", false),
        phase("two", "phases/two.sh", false),
    ]);
    config.execution.phase_timeout_seconds = 1;

    let run = run_pipeline(&config, dir.path(), "run-1".to_string(), true, false, CancellationToken::new())
        .await
        .unwrap();

    assert!(!run.run_result.phases[0].success);
    assert_eq!(run.run_result.phases.len(), 2);
    assert!(run.run_result.phases[1].success);
}

#[tokio::test]
async fn cancellation_before_a_phase_halts_the_run_and_still_writes_reports() {
    let dir = TempDir::new().unwrap();
    write_phase_script(dir.path(), "phases/one.sh", "exit 0");

    let config = bare_config(vec![phase("one", "phases/one.sh", false)]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = run_pipeline(&config, dir.path(), "run-1".to_string(), true, false, cancel)
        .await
        .unwrap();

    assert!(run.run_result.phases.is_empty());
    assert!(dir.path().join("outputs/autonomous_run_result.json").exists());
}

#[test]
fn purge_across_two_runs_leaves_independent_timestamped_archives() {
    let dir = TempDir::new().unwrap();

    fs::create_dir_all(dir.path().join("outputs")).unwrap();
    fs::write(dir.path().join("outputs/run1.json"), "{}").unwrap();
    purge(dir.path()).unwrap();

    fs::write(dir.path().join("outputs/run2.json"), "{}").unwrap();
    // Ensure the second archive gets a distinct timestamp directory name.
    std::thread::sleep(Duration::from_secs(1));
    purge(dir.path()).unwrap();

    let archives = dir.path().join("archives");
    let mut entries: Vec<String> = archives
        .read_dir()
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();

    assert_eq!(entries.len(), 2, "each purge of a non-empty outputs/ must create its own archive dir");
    assert_ne!(entries[0], entries[1]);
    assert!(dir.path().join("outputs").read_dir().unwrap().next().is_none());
}

#[test]
fn purge_is_idempotent_on_an_already_purged_folder() {
    let dir = TempDir::new().unwrap();
    purge(dir.path()).unwrap();
    purge(dir.path()).unwrap();
    assert!(dir.path().join("outputs").is_dir());
    assert!(dir.path().join("temp").is_dir());
    assert!(!dir.path().join("archives").exists());
}
