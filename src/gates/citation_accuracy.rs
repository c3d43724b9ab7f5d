//! Citation accuracy verification.
//!
//! Deterministic, filesystem-first gate that checks whether source-backed
//! claim statements align with their referenced evidence excerpts. This is
//! a lightweight early-warning system, not full fact-checking.

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::gates::{counters as gate_counters, resolve_outcome, OnFailure};
use crate::store::ArtifactStore;
use crate::types::{ClaimKind, ClaimRecord, EvidenceItem, GateAction, GateResult};

#[derive(Debug, Clone)]
pub struct CitationAccuracyGateConfig {
    pub enabled: bool,
    pub on_failure: OnFailure,
    pub min_alignment_score: f64,
    pub min_keyword_overlap: f64,
    pub enable_entity_overlap: bool,
    pub min_entity_overlap: f64,
    pub enable_numeric_consistency: bool,
    pub max_evidence_items_per_claim: usize,
}

impl Default for CitationAccuracyGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_failure: OnFailure::Block,
            min_alignment_score: 0.18,
            min_keyword_overlap: 0.06,
            enable_entity_overlap: false,
            min_entity_overlap: 0.20,
            enable_numeric_consistency: false,
            max_evidence_items_per_claim: 5,
        }
    }
}

impl CitationAccuracyGateConfig {
    /// Builds a config from a raw TOML table, clamping numeric fields to
    /// their valid ranges and defaulting unknown `on_failure` values to
    /// `block`, per the Design Notes' config-flattening replacement.
    pub fn from_map(raw: &toml::value::Table) -> Self {
        let defaults = Self::default();

        let enabled = raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
        let on_failure = OnFailure::from_str_or_default(raw.get("on_failure").and_then(|v| v.as_str()));

        let as_f64 = |key: &str, default: f64| -> f64 {
            raw.get(key).and_then(|v| v.as_float()).unwrap_or(default).clamp(0.0, 1.0)
        };
        let as_usize = |key: &str, default: usize| -> usize {
            raw.get(key)
                .and_then(|v| v.as_integer())
                .map(|n| n.max(1) as usize)
                .unwrap_or(default)
        };

        Self {
            enabled,
            on_failure,
            min_alignment_score: as_f64("min_alignment_score", defaults.min_alignment_score),
            min_keyword_overlap: as_f64("min_keyword_overlap", defaults.min_keyword_overlap),
            enable_entity_overlap: raw
                .get("enable_entity_overlap")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.enable_entity_overlap),
            min_entity_overlap: as_f64("min_entity_overlap", defaults.min_entity_overlap),
            enable_numeric_consistency: raw
                .get("enable_numeric_consistency")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.enable_numeric_consistency),
            max_evidence_items_per_claim: as_usize(
                "max_evidence_items_per_claim",
                defaults.max_evidence_items_per_claim,
            ),
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "with",
];

fn tokenize(text: &str) -> HashSet<String> {
    let re = Regex::new(r"[A-Za-z0-9]+").unwrap();
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.len() >= 3 && !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn extract_named_entities(text: &str) -> HashSet<String> {
    let re = Regex::new(r"\b(?:[A-Z][a-zA-Z]{2,}|[A-Z]{2,})\b").unwrap();
    re.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

fn extract_numbers(text: &str) -> HashSet<String> {
    let re = Regex::new(r"\b\d+(?:\.\d+)?%?\b").unwrap();
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Removes year-like integers (1900-2100, 4 digits, no `%` suffix) so they
/// don't dominate numeric-consistency checks.
fn filter_year_like_numbers(nums: HashSet<String>) -> HashSet<String> {
    nums.into_iter()
        .filter(|n| {
            if n.ends_with('%') {
                return true;
            }
            if n.len() == 4 && n.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(year) = n.parse::<i32>() {
                    return !(1900..=2100).contains(&year);
                }
            }
            true
        })
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimAlignmentReport {
    pub claim_id: String,
    pub citation_keys: Vec<String>,
    pub evidence_ids: Vec<String>,
    pub evidence_ids_used: Vec<String>,
    pub checked: bool,
    pub ok: bool,
    pub reasons: Vec<String>,
    pub alignment_score: f64,
    pub keyword_overlap: f64,
    pub entity_overlap: f64,
    pub numeric_ok: bool,
}

fn verify_claim(
    config: &CitationAccuracyGateConfig,
    claim: &ClaimRecord,
    evidence_items: &[&EvidenceItem],
) -> ClaimAlignmentReport {
    let mut used_ids = Vec::new();
    let mut combined = Vec::new();
    for item in evidence_items.iter().take(config.max_evidence_items_per_claim) {
        used_ids.push(item.evidence_id.clone());
        combined.push(item.excerpt.clone());
        if let Some(context) = &item.context {
            combined.push(context.clone());
        }
    }
    let evidence_text = combined.join("\n");

    let mut reasons = Vec::new();

    let claim_tokens = tokenize(&claim.statement);
    let evidence_tokens = tokenize(&evidence_text);
    let keyword_overlap = jaccard(&claim_tokens, &evidence_tokens);

    let entity_overlap = if config.enable_entity_overlap {
        let claim_ents = extract_named_entities(&claim.statement);
        let evidence_ents = extract_named_entities(&evidence_text);
        jaccard(&claim_ents, &evidence_ents)
    } else {
        0.0
    };

    let numeric_ok = if config.enable_numeric_consistency {
        let claim_nums = filter_year_like_numbers(extract_numbers(&claim.statement));
        let evidence_nums = filter_year_like_numbers(extract_numbers(&evidence_text));
        !(!claim_nums.is_empty() && !claim_nums.is_subset(&evidence_nums))
    } else {
        true
    };

    let mut alignment_score = keyword_overlap;
    if config.enable_entity_overlap {
        alignment_score = (alignment_score + 0.20 * entity_overlap).min(1.0);
    }
    if config.enable_numeric_consistency && !numeric_ok {
        alignment_score = (alignment_score * 0.50).max(0.0);
    }

    let mut ok = true;

    if keyword_overlap < config.min_keyword_overlap {
        ok = false;
        reasons.push("keyword_overlap_below_threshold".to_string());
    }
    if config.enable_entity_overlap && entity_overlap < config.min_entity_overlap {
        ok = false;
        reasons.push("entity_overlap_below_threshold".to_string());
    }
    if config.enable_numeric_consistency && !numeric_ok {
        ok = false;
        reasons.push("numeric_mismatch".to_string());
    }
    if alignment_score < config.min_alignment_score {
        ok = false;
        reasons.push("alignment_score_below_threshold".to_string());
    }

    ClaimAlignmentReport {
        claim_id: claim.claim_id.clone(),
        citation_keys: claim.citation_keys.clone(),
        evidence_ids: claim.evidence_ids.clone(),
        evidence_ids_used: used_ids,
        checked: true,
        ok,
        reasons,
        alignment_score: (alignment_score * 1_000_000.0).round() / 1_000_000.0,
        keyword_overlap: (keyword_overlap * 1_000_000.0).round() / 1_000_000.0,
        entity_overlap: (entity_overlap * 1_000_000.0).round() / 1_000_000.0,
        numeric_ok,
    }
}

fn skipped_report(claim: &ClaimRecord, reason: &str, evidence_ids_used: Vec<String>) -> ClaimAlignmentReport {
    ClaimAlignmentReport {
        claim_id: claim.claim_id.clone(),
        citation_keys: claim.citation_keys.clone(),
        evidence_ids: claim.evidence_ids.clone(),
        evidence_ids_used,
        checked: false,
        ok: true,
        reasons: vec![reason.to_string()],
        alignment_score: 0.0,
        keyword_overlap: 0.0,
        entity_overlap: 0.0,
        numeric_ok: true,
    }
}

pub fn evaluate(store: &ArtifactStore, config: &CitationAccuracyGateConfig) -> Result<GateResult, String> {
    let claims_path_present = store.root().join("claims/claims.json").exists();

    if !config.enabled {
        let (ok, action) = resolve_outcome(false, false, config.on_failure);
        return Ok(GateResult {
            gate_name: "citation_accuracy".to_string(),
            enabled: false,
            ok,
            action,
            reports: vec![],
            counters: gate_counters(&[
                ("checked_claims_total", json!(0)),
                ("failed_claims_total", json!(0)),
                ("skipped_missing_evidence_total", json!(0)),
                ("claims_file_present", json!(claims_path_present)),
            ]),
        });
    }

    let claims_result = store.read_claims()?;
    let source_backed: Vec<&ClaimRecord> = claims_result
        .items
        .iter()
        .filter(|c| c.kind == ClaimKind::SourceBacked)
        .collect();

    let mut evidence_by_id: HashMap<String, EvidenceItem> = HashMap::new();
    let mut evidence_invalid = 0usize;
    let evidence_files = store.iter_evidence_files()?;
    for path in &evidence_files {
        let source_id = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let result = store.read_evidence_items(&source_id)?;
        evidence_invalid += result.invalid_count;
        for item in result.items {
            evidence_by_id.insert(item.evidence_id.clone(), item);
        }
    }
    let evidence_files_scanned = evidence_files.len();

    let mut reports = Vec::new();
    let mut checked = 0usize;
    let mut failed = 0usize;
    let mut skipped_missing = 0usize;

    for claim in &source_backed {
        if claim.evidence_ids.is_empty() {
            skipped_missing += 1;
            reports.push(skipped_report(claim, "missing_evidence_ids", vec![]));
            continue;
        }

        let mut evidence_items = Vec::new();
        let mut missing_any = false;
        for ev_id in &claim.evidence_ids {
            match evidence_by_id.get(ev_id) {
                Some(item) => evidence_items.push(item),
                None => missing_any = true,
            }
        }

        if missing_any || evidence_items.is_empty() {
            skipped_missing += 1;
            let used: Vec<String> = evidence_items.iter().map(|i| i.evidence_id.clone()).collect();
            reports.push(skipped_report(claim, "evidence_ids_unresolved", used));
            continue;
        }

        let report = verify_claim(config, claim, &evidence_items);
        checked += 1;
        if !report.ok {
            failed += 1;
        }
        reports.push(report);
    }

    let has_problem = failed > 0;
    let (ok, action) = resolve_outcome(true, has_problem, config.on_failure);

    let report_values: Vec<serde_json::Value> = reports
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect();

    let mut counters: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    counters.insert("checked_claims_total".to_string(), json!(checked));
    counters.insert("failed_claims_total".to_string(), json!(failed));
    counters.insert("skipped_missing_evidence_total".to_string(), json!(skipped_missing));
    counters.insert("claims_file_present".to_string(), json!(claims_path_present));
    counters.insert("claims_invalid_items".to_string(), json!(claims_result.invalid_count));
    counters.insert("evidence_invalid_items".to_string(), json!(evidence_invalid));
    counters.insert("evidence_files_scanned".to_string(), json!(evidence_files_scanned));

    let result = GateResult {
        gate_name: "citation_accuracy".to_string(),
        enabled: true,
        ok,
        action,
        reports: report_values,
        counters,
    };

    store.write_gate_report("citation_accuracy", &result)?;

    Ok(result)
}
