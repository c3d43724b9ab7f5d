//! Sole custodian of the on-disk project layout. Writes are atomic
//! (temp-file + rename on the same filesystem, same pattern the teacher
//! used for `BACKLOG.yaml`). Schema violations are counted and returned to
//! the caller rather than raised.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::schema::{is_valid_citation_record, is_valid_claim_record, is_valid_evidence_item, is_valid_metric};
use crate::types::{CitationRecord, ClaimRecord, EvidenceItem, Metric, ProjectMetadata};

pub struct ArtifactStore {
    root: PathBuf,
}

/// Outcome of reading a list of records: parsed records plus a count of
/// entries that failed schema validation and were dropped.
pub struct ReadResult<T> {
    pub items: Vec<T>,
    pub invalid_count: usize,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_json_atomic<T: Serialize>(&self, rel_path: &str, value: &T) -> Result<(), String> {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        let mut body = serde_json::to_string_pretty(value)
            .map_err(|e| format!("failed to serialize {}: {}", rel_path, e))?;
        body.push('\n');

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, body)
            .map_err(|e| format!("failed to write {}: {}", tmp_path.display(), e))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| format!("failed to rename {} to {}: {}", tmp_path.display(), path.display(), e))?;

        Ok(())
    }

    fn read_json_list<T: DeserializeOwned>(
        &self,
        rel_path: &str,
        is_valid: impl Fn(&T) -> bool,
    ) -> Result<ReadResult<T>, String> {
        let path = self.root.join(rel_path);
        if !path.exists() {
            return Ok(ReadResult {
                items: Vec::new(),
                invalid_count: 0,
            });
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let raw: Vec<serde_json::Value> = serde_json::from_str(&contents)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;

        let mut items = Vec::new();
        let mut invalid_count = 0;
        for value in raw {
            match serde_json::from_value::<T>(value) {
                Ok(item) if is_valid(&item) => items.push(item),
                _ => invalid_count += 1,
            }
        }

        Ok(ReadResult {
            items,
            invalid_count,
        })
    }

    pub fn read_project_metadata(&self) -> Result<Option<ProjectMetadata>, String> {
        let path = self.root.join("project.json");
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let meta: ProjectMetadata = serde_json::from_str(&contents)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
        Ok(Some(meta))
    }

    fn evidence_path(source_id: &str) -> String {
        format!("sources/{}/evidence.json", source_id)
    }

    /// Overwrites the evidence list for one source (per the Open Question
    /// decision in DESIGN.md: "overwrite per extraction").
    pub fn write_evidence_items(&self, source_id: &str, mut items: Vec<EvidenceItem>) -> Result<(), String> {
        items.sort_by(|a, b| a.evidence_id.cmp(&b.evidence_id));
        self.write_json_atomic(&Self::evidence_path(source_id), &items)
    }

    /// Appends to the existing evidence list for one source instead of
    /// overwriting it, for callers that explicitly request append semantics.
    pub fn append_evidence_items(&self, source_id: &str, new_items: Vec<EvidenceItem>) -> Result<(), String> {
        let mut existing = self.read_evidence_items(source_id)?.items;
        existing.extend(new_items);
        self.write_evidence_items(source_id, existing)
    }

    pub fn read_evidence_items(&self, source_id: &str) -> Result<ReadResult<EvidenceItem>, String> {
        self.read_json_list(&Self::evidence_path(source_id), is_valid_evidence_item)
    }

    /// All `sources/<id>` directory names under the project root, sorted.
    pub fn list_source_ids(&self) -> Result<Vec<String>, String> {
        let sources_dir = self.root.join("sources");
        if !sources_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries = fs::read_dir(&sources_dir)
            .map_err(|e| format!("failed to read {}: {}", sources_dir.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read dir entry: {}", e))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// All `sources/*/evidence.json` paths present under the project root,
    /// sorted for deterministic iteration order.
    pub fn iter_evidence_files(&self) -> Result<Vec<PathBuf>, String> {
        let sources_dir = self.root.join("sources");
        if !sources_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let entries = fs::read_dir(&sources_dir)
            .map_err(|e| format!("failed to read {}: {}", sources_dir.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read dir entry: {}", e))?;
            let candidate = entry.path().join("evidence.json");
            if candidate.is_file() {
                paths.push(candidate);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn read_claims(&self) -> Result<ReadResult<ClaimRecord>, String> {
        self.read_json_list("claims/claims.json", is_valid_claim_record)
    }

    pub fn append_claims(&self, new_claims: Vec<ClaimRecord>) -> Result<(), String> {
        let mut existing = self.read_claims()?.items;
        existing.extend(new_claims);
        existing.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));
        self.write_json_atomic("claims/claims.json", &existing)
    }

    pub fn read_metrics(&self) -> Result<ReadResult<Metric>, String> {
        self.read_json_list("outputs/metrics.json", is_valid_metric)
    }

    pub fn append_metrics(&self, new_metrics: Vec<Metric>) -> Result<(), String> {
        let mut existing = self.read_metrics()?.items;
        existing.extend(new_metrics);
        existing.sort_by(|a, b| a.metric_key.cmp(&b.metric_key));
        self.write_json_atomic("outputs/metrics.json", &existing)
    }

    pub fn list_citations(&self) -> Result<ReadResult<CitationRecord>, String> {
        self.read_json_list("citations/citations.json", is_valid_citation_record)
    }

    /// Inserts or replaces a citation record keyed by `citation_key`.
    pub fn upsert_citation(&self, record: CitationRecord) -> Result<(), String> {
        let mut existing = self.list_citations()?.items;
        existing.retain(|c| c.citation_key != record.citation_key);
        existing.push(record);
        existing.sort_by(|a, b| a.citation_key.cmp(&b.citation_key));
        self.write_json_atomic("citations/citations.json", &existing)
    }

    pub fn write_citations(&self, mut records: Vec<CitationRecord>) -> Result<(), String> {
        records.sort_by(|a, b| a.citation_key.cmp(&b.citation_key));
        self.write_json_atomic("citations/citations.json", &records)
    }

    pub fn write_section(&self, name: &str, tex: &str) -> Result<(), String> {
        let path = self.root.join("outputs/sections").join(format!("{}.tex", name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        let tmp_path = path.with_extension("tex.tmp");
        fs::write(&tmp_path, tex)
            .map_err(|e| format!("failed to write {}: {}", tmp_path.display(), e))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| format!("failed to rename {} to {}: {}", tmp_path.display(), path.display(), e))?;
        Ok(())
    }

    pub fn write_gate_report<T: Serialize>(&self, gate_name: &str, result: &T) -> Result<(), String> {
        self.write_json_atomic(&format!("outputs/gates/{}.json", gate_name), result)
    }

    pub fn write_json<T: Serialize>(&self, rel_path: &str, value: &T) -> Result<(), String> {
        self.write_json_atomic(rel_path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvidenceKind, Locator, ParserInfo};
    use chrono::Utc;

    fn sample_evidence(id: &str) -> EvidenceItem {
        EvidenceItem {
            schema_version: "1".into(),
            created_at: Utc::now(),
            evidence_id: id.into(),
            source_id: "src1".into(),
            kind: EvidenceKind::Quote,
            locator: Locator {
                locator_type: "page".into(),
                value: "1".into(),
                span: None,
            },
            excerpt: "some excerpt".into(),
            context: None,
            parser: ParserInfo { name: "pdf".into() },
        }
    }

    #[test]
    fn write_then_read_evidence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store
            .write_evidence_items("src1", vec![sample_evidence("e2"), sample_evidence("e1")])
            .unwrap();

        let result = store.read_evidence_items("src1").unwrap();
        assert_eq!(result.invalid_count, 0);
        assert_eq!(result.items.len(), 2);
        // sorted by evidence_id
        assert_eq!(result.items[0].evidence_id, "e1");
        assert_eq!(result.items[1].evidence_id, "e2");
    }

    #[test]
    fn append_evidence_items_adds_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.write_evidence_items("src1", vec![sample_evidence("e1")]).unwrap();
        store
            .append_evidence_items("src1", vec![sample_evidence("e2")])
            .unwrap();

        let result = store.read_evidence_items("src1").unwrap();
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn read_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let result = store.read_claims().unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.invalid_count, 0);
    }
}
