//! Agent Runtime: a generic harness that runs one named agent. Agents are
//! represented as a static registry keyed by id rather than a class
//! hierarchy — each entry pairs a spec with a strategy function.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future;
use serde_json::Value;

use crate::types::{AgentResult, ModelTier, TaskType};

/// Static metadata for one agent. `can_call` names other agent ids this
/// agent may invoke as part of its strategy (informational; the runtime
/// does not enforce a call graph).
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub task_type: TaskType,
    pub system_prompt: String,
    pub model_tier: ModelTier,
    pub uses_extended_thinking: bool,
    pub can_call: Vec<String>,
    pub supports_revision: bool,
}

/// Input context assembled from the Artifact Store per the agent's
/// declared input schema. Left as an opaque JSON value — the concrete
/// shape is agent-specific.
pub type AgentInput = Value;

/// An agent's executable behavior: deterministic code, an LLM call, or a
/// mix of both. Implementations live alongside their phase, not here.
#[async_trait::async_trait]
pub trait AgentStrategy: Send + Sync {
    async fn run(&self, input: AgentInput) -> Result<(String, Value, u64), String>;
}

pub struct AgentRegistryEntry {
    pub spec: AgentSpec,
    pub strategy: Box<dyn AgentStrategy>,
}

#[derive(Default)]
pub struct AgentRegistry {
    entries: HashMap<String, AgentRegistryEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, spec: AgentSpec, strategy: Box<dyn AgentStrategy>) {
        self.entries.insert(id.into(), AgentRegistryEntry { spec, strategy });
    }

    pub fn get(&self, id: &str) -> Option<&AgentRegistryEntry> {
        self.entries.get(id)
    }
}

#[derive(Debug, Clone)]
pub struct RevisionTrigger {
    pub iteration: u32,
    pub max_iterations: u32,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub min_improvement: f64,
    pub require_no_critical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    ThresholdMet,
    NoImprovement,
    MaxIterationsReached,
}

/// Decides whether a revision loop should stop given the latest and
/// previous quality scores.
pub fn should_stop(
    criteria: &ConvergenceCriteria,
    iteration: u32,
    quality: f64,
    previous_quality: Option<f64>,
    has_critical_issues: bool,
) -> Option<StopReason> {
    if quality >= criteria.quality_threshold {
        return Some(StopReason::ThresholdMet);
    }
    if iteration >= criteria.max_iterations {
        return Some(StopReason::MaxIterationsReached);
    }
    if let Some(prev) = previous_quality {
        let improvement = quality - prev;
        if improvement < criteria.min_improvement && !(criteria.require_no_critical && has_critical_issues) {
            return Some(StopReason::NoImprovement);
        }
    }
    None
}

/// Runs one agent with an optional wall-clock budget. Exceeding the
/// budget returns normally with `success=false`, never an error.
pub async fn run_agent(
    agent_id: &str,
    registry: &AgentRegistry,
    input: AgentInput,
    budget: Option<Duration>,
) -> AgentResult {
    let Some(entry) = registry.get(agent_id) else {
        return AgentResult {
            agent_name: agent_id.to_string(),
            task_type: TaskType::Extraction,
            model_tier: ModelTier::Small,
            success: false,
            content: String::new(),
            structured_data: Value::Null,
            error: Some(format!("unknown agent id '{}'", agent_id)),
            tokens_used: 0,
            execution_time: 0.0,
            timestamp: Utc::now(),
        };
    };

    let started = Instant::now();
    let call = entry.strategy.run(input);

    let outcome = match budget {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err("agent exceeded its wall-clock budget".to_string()),
        },
        None => call.await,
    };

    let execution_time = started.elapsed().as_secs_f64();

    match outcome {
        Ok((content, structured_data, tokens_used)) => AgentResult {
            agent_name: entry.spec.name.clone(),
            task_type: entry.spec.task_type,
            model_tier: entry.spec.model_tier,
            success: true,
            content,
            structured_data,
            error: None,
            tokens_used,
            execution_time,
            timestamp: Utc::now(),
        },
        Err(error) => AgentResult {
            agent_name: entry.spec.name.clone(),
            task_type: entry.spec.task_type,
            model_tier: entry.spec.model_tier,
            success: false,
            content: String::new(),
            structured_data: Value::Null,
            error: Some(error),
            tokens_used: 0,
            execution_time,
            timestamp: Utc::now(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct DeliberationOutcome {
    pub consolidated_output: String,
    pub conflict_detected: bool,
    pub degraded: bool,
    pub rationale: String,
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Runs `agent_ids` through the same `input` concurrently, bounded by
/// `fan_out` (spec: typically <= 4), and consolidates the results. Agents
/// beyond the first `fan_out` run in subsequent batches rather than all at
/// once. Completion order never affects the outcome — `consolidate_deliberation`
/// re-sorts by agent id.
pub async fn deliberate(
    agent_ids: &[String],
    registry: &AgentRegistry,
    input: AgentInput,
    budget: Option<Duration>,
    fan_out: usize,
) -> DeliberationOutcome {
    let fan_out = fan_out.max(1);
    let mut outputs: Vec<(String, AgentResult)> = Vec::with_capacity(agent_ids.len());

    for batch in agent_ids.chunks(fan_out) {
        let batch_outputs = future::join_all(batch.iter().map(|agent_id| {
            let input = input.clone();
            async move {
                let result = run_agent(agent_id, registry, input, budget).await;
                (agent_id.clone(), result)
            }
        }))
        .await;
        outputs.extend(batch_outputs);
    }

    consolidate_deliberation(&outputs)
}

/// Consolidates N concurrent agent outputs for the same task into one
/// artifact, keyed deterministically by agent id (sorted) regardless of
/// completion order. Detects conflict when any pair of whitespace-normalized
/// outputs differ.
pub fn consolidate_deliberation(outputs: &[(String, AgentResult)]) -> DeliberationOutcome {
    let mut sorted: Vec<&(String, AgentResult)> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let normalized: Vec<String> = sorted.iter().map(|(_, r)| normalize_whitespace(&r.content)).collect();
    let conflict_detected = normalized.windows(2).any(|pair| pair[0] != pair[1]);

    let any_failed = sorted.iter().any(|(_, r)| !r.success);

    let consolidated_output = sorted
        .first()
        .map(|(_, r)| r.content.clone())
        .unwrap_or_default();

    let rationale = if conflict_detected {
        format!(
            "{} of {} agent outputs disagreed; consolidated from '{}'",
            normalized.iter().filter(|n| **n != normalized[0]).count(),
            normalized.len(),
            sorted.first().map(|(id, _)| id.as_str()).unwrap_or("?")
        )
    } else {
        "all agent outputs agreed".to_string()
    };

    DeliberationOutcome {
        consolidated_output,
        conflict_detected,
        degraded: conflict_detected || any_failed,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;

    fn agent_result(content: &str, success: bool) -> AgentResult {
        AgentResult {
            agent_name: "a".into(),
            task_type: TaskType::Synthesis,
            model_tier: ModelTier::Balanced,
            success,
            content: content.to_string(),
            structured_data: Value::Null,
            error: None,
            tokens_used: 0,
            execution_time: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn identical_outputs_do_not_conflict() {
        let outputs = vec![
            ("a1".to_string(), agent_result("same  text", true)),
            ("a2".to_string(), agent_result("same text", true)),
        ];
        let outcome = consolidate_deliberation(&outputs);
        assert!(!outcome.conflict_detected);
        assert!(!outcome.degraded);
    }

    #[test]
    fn differing_outputs_conflict_and_degrade() {
        let outputs = vec![
            ("a1".to_string(), agent_result("alpha", true)),
            ("a2".to_string(), agent_result("beta", true)),
        ];
        let outcome = consolidate_deliberation(&outputs);
        assert!(outcome.conflict_detected);
        assert!(outcome.degraded);
    }

    #[test]
    fn threshold_met_stops_immediately() {
        let criteria = ConvergenceCriteria {
            quality_threshold: 0.8,
            max_iterations: 5,
            min_improvement: 0.05,
            require_no_critical: false,
        };
        assert_eq!(should_stop(&criteria, 1, 0.85, None, false), Some(StopReason::ThresholdMet));
    }

    #[test]
    fn max_iterations_stops_when_below_threshold() {
        let criteria = ConvergenceCriteria {
            quality_threshold: 0.9,
            max_iterations: 2,
            min_improvement: 0.05,
            require_no_critical: false,
        };
        assert_eq!(should_stop(&criteria, 2, 0.5, Some(0.4), false), Some(StopReason::MaxIterationsReached));
    }

    #[test]
    fn insufficient_improvement_stops() {
        let criteria = ConvergenceCriteria {
            quality_threshold: 0.9,
            max_iterations: 10,
            min_improvement: 0.05,
            require_no_critical: false,
        };
        assert_eq!(should_stop(&criteria, 3, 0.51, Some(0.50), false), Some(StopReason::NoImprovement));
    }

    #[tokio::test]
    async fn unknown_agent_id_returns_failed_result_not_error() {
        let registry = AgentRegistry::new();
        let result = run_agent("missing", &registry, Value::Null, None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown agent id"));
    }

    struct TrackingStrategy {
        content: String,
        in_flight: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        max_observed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl AgentStrategy for TrackingStrategy {
        async fn run(&self, _input: AgentInput) -> Result<(String, Value, u64), String> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok((self.content.clone(), Value::Null, 0))
        }
    }

    fn spec(name: &str) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            task_type: TaskType::Synthesis,
            system_prompt: String::new(),
            model_tier: ModelTier::Balanced,
            uses_extended_thinking: false,
            can_call: vec![],
            supports_revision: false,
        }
    }

    #[tokio::test]
    async fn deliberate_runs_concurrently_but_never_exceeds_fan_out() {
        let in_flight = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_observed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut registry = AgentRegistry::new();
        let agent_ids: Vec<String> = (0..5).map(|i| format!("agent-{}", i)).collect();
        for id in &agent_ids {
            registry.register(
                id.clone(),
                spec(id),
                Box::new(TrackingStrategy {
                    content: "agreed output".to_string(),
                    in_flight: in_flight.clone(),
                    max_observed: max_observed.clone(),
                }),
            );
        }

        let fan_out = RunnerConfig::default().execution.deliberation_fan_out;
        let outcome = deliberate(&agent_ids, &registry, Value::Null, None, fan_out).await;

        assert!(!outcome.conflict_detected);
        assert!(!outcome.degraded);
        assert!(
            max_observed.load(std::sync::atomic::Ordering::SeqCst) >= 2,
            "fan-out should run more than one agent at a time"
        );
        assert!(
            max_observed.load(std::sync::atomic::Ordering::SeqCst) <= fan_out,
            "fan-out must never exceed deliberation_fan_out"
        );
    }

    #[tokio::test]
    async fn deliberate_surfaces_disagreement_from_a_concurrent_batch() {
        let mut registry = AgentRegistry::new();
        registry.register(
            "a1",
            spec("a1"),
            Box::new(TrackingStrategy {
                content: "alpha".to_string(),
                in_flight: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                max_observed: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }),
        );
        registry.register(
            "a2",
            spec("a2"),
            Box::new(TrackingStrategy {
                content: "beta".to_string(),
                in_flight: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                max_observed: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }),
        );

        let agent_ids = vec!["a1".to_string(), "a2".to_string()];
        let outcome = deliberate(&agent_ids, &registry, Value::Null, None, 4).await;

        assert!(outcome.conflict_detected);
        assert!(outcome.degraded);
    }
}
