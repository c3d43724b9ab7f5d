use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Common envelope fields every persisted record carries.
pub trait Record {
    fn schema_version(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Quote,
    Paraphrase,
    Metric,
    Figure,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Locator {
    #[serde(rename = "type")]
    pub locator_type: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParserInfo {
    pub name: String,
}

/// One evidence excerpt tied to a parsed source.
///
/// Invariant: `evidence_id` unique within the project; `source_id` matches
/// the owning `sources/<source_id>/` directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub evidence_id: String,
    pub source_id: String,
    pub kind: EvidenceKind,
    pub locator: Locator,
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub parser: ParserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    SourceBacked,
    Computed,
    Theoretical,
}

/// Invariant: `kind=source_backed` requires `evidence_ids` or `citation_keys`
/// present; `kind=computed` requires `metric_keys` present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimRecord {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub claim_id: String,
    pub kind: ClaimKind,
    pub statement: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citation_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_keys: Vec<String>,
}

impl ClaimRecord {
    /// Structural invariant check from the data model — does not resolve
    /// referenced ids, only checks shape.
    pub fn satisfies_kind_invariant(&self) -> bool {
        match self.kind {
            ClaimKind::SourceBacked => {
                !self.evidence_ids.is_empty() || !self.citation_keys.is_empty()
            }
            ClaimKind::Computed => !self.metric_keys.is_empty(),
            ClaimKind::Theoretical => true,
        }
    }
}

/// `metric_key` unique across `outputs/metrics.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub metric_key: String,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CitationStatus {
    Unverified,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openalex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationAttempt {
    pub provider: String,
    pub ok: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<VerificationAttempt>,
}

/// Invariant: `citation_key` unique; records sharing a normalized DOI are
/// merged by the bibliography resolver, one key re-aliased to the survivor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationRecord {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub citation_key: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: i32,
    #[serde(default)]
    pub identifiers: CitationIdentifiers,
    pub status: CitationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(default)]
    pub manual_verification_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Pass,
    Block,
    Downgrade,
    Disabled,
}

/// Result emitted by every gate in the Gate Evaluator family.
///
/// `ok` is true iff `action` is anything other than `block`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateResult {
    pub gate_name: String,
    pub enabled: bool,
    pub ok: bool,
    pub action: GateAction,
    #[serde(default)]
    pub reports: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub counters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Balanced,
    Large,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Extraction,
    Synthesis,
    Critique,
    Writing,
}

/// Result of one agent execution inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub agent_name: String,
    pub task_type: TaskType,
    pub model_tier: ModelTier,
    pub success: bool,
    pub content: String,
    #[serde(default)]
    pub structured_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScore {
    pub overall: f64,
    pub accuracy: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub consistency: f64,
    pub methodology: f64,
    pub contribution: f64,
    pub style: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub category: String,
    pub severity: IssueSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub affects_downstream: bool,
}

/// Produced by review/critique agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackResponse {
    pub quality_score: QualityScore,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub summary: String,
    pub revision_required: bool,
    #[serde(default)]
    pub revision_priority: Vec<String>,
}

/// Result of running one phase's child process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    pub phase_id: String,
    pub phase_name: String,
    pub success: bool,
    pub exit_code: i32,
    pub execution_time: f64,
    pub degraded: bool,
    #[serde(default)]
    pub degradation_reasons: Vec<String>,
    pub error_count: u32,
    pub warning_count: u32,
    pub critical_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaperType {
    Empirical,
    Theoretical,
    Review,
    CaseStudy,
}

/// Submission metadata, created by intake and read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMetadata {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub id: String,
    pub title: String,
    pub research_question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    pub target_journal: String,
    pub paper_type: PaperType,
    pub has_data: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_backed_claim_requires_evidence_or_citations() {
        let claim = ClaimRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            claim_id: "c1".into(),
            kind: ClaimKind::SourceBacked,
            statement: "x".into(),
            citation_keys: vec![],
            evidence_ids: vec![],
            metric_keys: vec![],
        };
        assert!(!claim.satisfies_kind_invariant());
    }

    #[test]
    fn computed_claim_requires_metric_keys() {
        let mut claim = ClaimRecord {
            schema_version: "1".into(),
            created_at: Utc::now(),
            claim_id: "c1".into(),
            kind: ClaimKind::Computed,
            statement: "x".into(),
            citation_keys: vec![],
            evidence_ids: vec![],
            metric_keys: vec![],
        };
        assert!(!claim.satisfies_kind_invariant());
        claim.metric_keys.push("m1".into());
        assert!(claim.satisfies_kind_invariant());
    }
}
