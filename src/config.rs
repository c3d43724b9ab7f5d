use std::path::Path;

use serde::Deserialize;

#[derive(Default, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RunnerConfig {
    pub project: ProjectConfig,
    pub execution: ExecutionConfig,
    pub gates: GatesConfig,
    pub llm: LlmConfig,
    pub literature: LiteratureConfig,
    pub bibliography: BibliographyConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ProjectConfig {
    /// Phases to run, in order. Defaults to the full pipeline.
    pub phases: Vec<PhaseConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            phases: default_phases(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub id: String,
    pub name: String,
    pub entry: String,
    #[serde(default)]
    pub critical: bool,
}

pub fn default_phases() -> Vec<PhaseConfig> {
    vec![
        PhaseConfig {
            id: "intake".into(),
            name: "Intake".into(),
            entry: "phases/intake.py".into(),
            critical: true,
        },
        PhaseConfig {
            id: "literature".into(),
            name: "Literature Retrieval".into(),
            entry: "phases/literature.py".into(),
            critical: false,
        },
        PhaseConfig {
            id: "gap_resolution".into(),
            name: "Gap Resolution".into(),
            entry: "phases/gap_resolution.py".into(),
            critical: false,
        },
        PhaseConfig {
            id: "writing_review".into(),
            name: "Writing & Review".into(),
            entry: "phases/writing_review.py".into(),
            critical: true,
        },
        PhaseConfig {
            id: "assembly".into(),
            name: "Paper Assembly".into(),
            entry: "phases/assembly.py".into(),
            critical: true,
        },
        PhaseConfig {
            id: "compilation".into(),
            name: "Compilation".into(),
            entry: "phases/compilation.py".into(),
            critical: false,
        },
    ]
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub phase_timeout_seconds: u64,
    pub deliberation_fan_out: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            phase_timeout_seconds: 3600,
            deliberation_fan_out: 4,
        }
    }
}

/// Raw `{enabled, on_failure, ...thresholds}` tables, one per gate kind.
/// Each gate's own `*GateConfig::from_map` interprets its table, clamping
/// thresholds and defaulting unknown `on_failure` values to `block`.
#[derive(Default, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GatesConfig {
    pub evidence: toml::value::Table,
    pub citation_accuracy: toml::value::Table,
    pub computation: toml::value::Table,
    pub claim_evidence: toml::value::Table,
    pub literature: toml::value::Table,
    pub analysis: toml::value::Table,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub small_model: String,
    pub balanced_model: String,
    pub large_model: String,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            small_model: "claude-haiku".into(),
            balanced_model: "claude-sonnet".into(),
            large_model: "claude-opus".into(),
            max_retries: 3,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LiteratureConfig {
    pub dedup_window_minutes: i64,
}

impl Default for LiteratureConfig {
    fn default() -> Self {
        Self {
            dedup_window_minutes: 30,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BibliographyConfig {
    pub max_age_hours: i64,
}

impl Default for BibliographyConfig {
    fn default() -> Self {
        Self { max_age_hours: 24 }
    }
}

pub fn validate(config: &RunnerConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.project.phases.is_empty() {
        errors.push("project.phases must have at least one phase".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for phase in &config.project.phases {
        if !seen.insert(phase.id.as_str()) {
            errors.push(format!("duplicate phase id '{}'", phase.id));
        }
    }

    if config.execution.phase_timeout_seconds == 0 {
        errors.push("execution.phase_timeout_seconds must be > 0".to_string());
    }

    if config.execution.deliberation_fan_out == 0 {
        errors.push("execution.deliberation_fan_out must be >= 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Loads config from an explicit path (if provided), else `{project_root}/runner.toml`,
/// falling back to defaults if neither exists.
pub fn load_config_from(config_path: Option<&Path>, project_root: &Path) -> Result<RunnerConfig, String> {
    match config_path {
        Some(path) => load_config_at(path),
        None => load_config(project_root),
    }
}

fn load_config_at(path: &Path) -> Result<RunnerConfig, String> {
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let config: RunnerConfig =
        toml::from_str(&contents).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
    validate(&config).map_err(|errors| format_errors(&errors))?;
    Ok(config)
}

pub fn load_config(project_root: &Path) -> Result<RunnerConfig, String> {
    let config_path = project_root.join("runner.toml");
    if !config_path.exists() {
        return Ok(RunnerConfig::default());
    }
    let contents =
        std::fs::read_to_string(&config_path).map_err(|e| format!("Failed to read {}: {}", config_path.display(), e))?;
    let config: RunnerConfig =
        toml::from_str(&contents).map_err(|e| format!("Failed to parse {}: {}", config_path.display(), e))?;
    validate(&config).map_err(|errors| format_errors(&errors))?;
    Ok(config)
}

fn format_errors(errors: &[String]) -> String {
    format!(
        "Config validation failed:\n{}",
        errors.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n")
    )
}
