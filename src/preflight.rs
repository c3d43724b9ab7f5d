//! Pre-flight validation, run once before the purge. Distinct from the
//! purge itself — this only checks that the project folder and config are
//! sound enough to attempt a run; it performs no writes.

use std::collections::HashSet;
use std::path::Path;

use crate::config::{validate, RunnerConfig};

/// A single pre-flight failure with actionable context.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightError {
    pub condition: String,
    pub config_location: String,
    pub suggested_fix: String,
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Preflight error: {}\n  Config: {}\n  Fix: {}", self.condition, self.config_location, self.suggested_fix)
    }
}

/// Runs all pre-flight checks in five phases:
/// 1. Project folder existence.
/// 2. Config structural validation.
/// 3. Phase entry-file probe (gated on phase 1+2 passing).
/// 4. Duplicate phase id check.
/// 5. Gate threshold sanity check.
///
/// Returns `Ok(())` if every phase passes, or `Err` with every error found.
pub fn run_preflight(config: &RunnerConfig, project_folder: &Path) -> Result<(), Vec<PreflightError>> {
    let mut errors = Vec::new();

    if !project_folder.is_dir() {
        errors.push(PreflightError {
            condition: format!("project folder not found: {}", project_folder.display()),
            config_location: "<project_folder>".to_string(),
            suggested_fix: "Pass an existing directory as the project folder argument".to_string(),
        });
        return Err(errors);
    }

    errors.extend(structural_errors(config));
    let structural_ok = errors.is_empty();

    if structural_ok {
        errors.extend(probe_phase_entries(config, project_folder));
    }

    errors.extend(duplicate_phase_ids(config));
    errors.extend(gate_threshold_errors(config));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn structural_errors(config: &RunnerConfig) -> Vec<PreflightError> {
    validate(config)
        .err()
        .unwrap_or_default()
        .into_iter()
        .map(|condition| PreflightError {
            condition,
            config_location: "runner.toml".to_string(),
            suggested_fix: "Review runner.toml against the documented defaults".to_string(),
        })
        .collect()
}

fn probe_phase_entries(config: &RunnerConfig, project_folder: &Path) -> Vec<PreflightError> {
    let mut errors = Vec::new();
    for phase in &config.project.phases {
        let entry_path = project_folder.join(&phase.entry);
        if !entry_path.exists() {
            errors.push(PreflightError {
                condition: format!("phase entry not found: {}", phase.entry),
                config_location: format!("runner.toml → project.phases[{}].entry", phase.id),
                suggested_fix: format!("Create {} or update the phase's entry path", entry_path.display()),
            });
        }
    }
    errors
}

fn duplicate_phase_ids(config: &RunnerConfig) -> Vec<PreflightError> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    for phase in &config.project.phases {
        if !seen.insert(phase.id.clone()) {
            errors.push(PreflightError {
                condition: format!("duplicate phase id \"{}\"", phase.id),
                config_location: "runner.toml → project.phases".to_string(),
                suggested_fix: "Give each phase a unique id".to_string(),
            });
        }
    }
    errors
}

fn gate_threshold_errors(config: &RunnerConfig) -> Vec<PreflightError> {
    let mut errors = Vec::new();
    for (gate_name, table) in [
        ("evidence", &config.gates.evidence),
        ("citation_accuracy", &config.gates.citation_accuracy),
        ("computation", &config.gates.computation),
        ("claim_evidence", &config.gates.claim_evidence),
        ("literature", &config.gates.literature),
        ("analysis", &config.gates.analysis),
    ] {
        if let Some(on_failure) = table.get("on_failure").and_then(|v| v.as_str()) {
            if on_failure != "block" && on_failure != "downgrade" {
                errors.push(PreflightError {
                    condition: format!("gate \"{}\" has unknown on_failure \"{}\"", gate_name, on_failure),
                    config_location: format!("runner.toml → gates.{}.on_failure", gate_name),
                    suggested_fix: "Use \"block\" or \"downgrade\"".to_string(),
                });
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_folder_fails_fast() {
        let config = RunnerConfig::default();
        let result = run_preflight(&config, Path::new("/does/not/exist/at/all"));
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].condition.contains("not found"));
    }

    #[test]
    fn default_config_passes_structural_and_duplicate_checks() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::default();
        let errors = structural_errors(&config);
        assert!(errors.is_empty());
        let errors = duplicate_phase_ids(&config);
        assert!(errors.is_empty());
        // entry probe will fail since no phase scripts exist, but that's
        // a separate phase not exercised here
        let _ = dir;
    }

    #[test]
    fn missing_phase_entries_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::default();
        let errors = probe_phase_entries(&config, dir.path());
        assert_eq!(errors.len(), config.project.phases.len());
    }

    #[test]
    fn unknown_on_failure_value_is_reported() {
        let mut config = RunnerConfig::default();
        let mut table = toml::value::Table::new();
        table.insert("on_failure".to_string(), toml::Value::String("ignore".to_string()));
        config.gates.evidence = table;
        let errors = gate_threshold_errors(&config);
        assert_eq!(errors.len(), 1);
    }
}
