//! Literature Client: submits literature-synthesis jobs, deduplicates
//! identical in-flight/recent queries via a SHA-256 fingerprint map, and
//! normalizes provider responses into `LiteratureResult`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::LiteratureConfig;
use crate::error::RunnerError;
use crate::retry::RetryPolicy;
use crate::schema::normalize_doi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureResult {
    pub query: String,
    pub response: String,
    pub citations: Vec<Citation>,
    pub status: JobStatus,
    pub job_id: Option<String>,
    pub processing_time: f64,
    pub error: Option<String>,
}

fn fingerprint(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

struct DedupState {
    in_flight: HashMap<String, DateTime<Utc>>,
}

const DEFAULT_BASE_URL: &str = "https://api.edison.example/v1/literature";

/// Wraps the external literature-synthesis API. Owns the process-wide
/// dedup map, scoped to this client instance's lifetime (not module load).
pub struct LiteratureClient {
    http: reqwest::Client,
    api_key: Option<String>,
    init_error: Option<String>,
    base_url: String,
    dedup_window: chrono::Duration,
    dedup: Mutex<DedupState>,
    retry: RetryPolicy,
}

impl LiteratureClient {
    pub fn new(api_key: Option<String>, config: LiteratureConfig) -> Self {
        let init_error = if api_key.as_deref().map(|k| k.trim().is_empty()).unwrap_or(true) {
            Some("EDISON_API_KEY not set".to_string())
        } else {
            None
        };
        Self {
            http: reqwest::Client::new(),
            api_key,
            init_error,
            base_url: DEFAULT_BASE_URL.to_string(),
            dedup_window: chrono::Duration::minutes(config.dedup_window_minutes),
            dedup: Mutex::new(DedupState {
                in_flight: HashMap::new(),
            }),
            retry: RetryPolicy::default(),
        }
    }

    /// Points this client at a different provider endpoint. Used by tests
    /// to target a local mock server instead of the real provider.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_available(&self) -> bool {
        self.init_error.is_none()
    }

    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Submits a literature-synthesis query, awaiting terminal completion.
    /// Returns a `FAILED` result with a "duplicate request blocked" error
    /// if an identical query was submitted within the dedup window.
    pub async fn search_literature(&self, query: &str, now: DateTime<Utc>) -> LiteratureResult {
        if let Some(err) = &self.init_error {
            return LiteratureResult {
                query: query.to_string(),
                response: String::new(),
                citations: vec![],
                status: JobStatus::Failed,
                job_id: None,
                processing_time: 0.0,
                error: Some(err.clone()),
            };
        }

        let fp = fingerprint(query);

        {
            let mut state = self.dedup.lock().unwrap();
            state.in_flight.retain(|_, ts| now.signed_duration_since(*ts) <= self.dedup_window);

            if let Some(ts) = state.in_flight.get(&fp) {
                if now.signed_duration_since(*ts) <= self.dedup_window {
                    return LiteratureResult {
                        query: query.to_string(),
                        response: String::new(),
                        citations: vec![],
                        status: JobStatus::Failed,
                        job_id: None,
                        processing_time: 0.0,
                        error: Some("Duplicate request blocked".to_string()),
                    };
                }
            }

            state.in_flight.insert(fp.clone(), now);
        }

        let api_key = self.api_key.clone().unwrap();
        match self.retry.run(|| self.submit_job(&api_key, query)).await {
            Ok(result) => result,
            Err(err) => LiteratureResult {
                query: query.to_string(),
                response: String::new(),
                citations: vec![],
                status: JobStatus::Failed,
                job_id: None,
                processing_time: 0.0,
                error: Some(err.to_string()),
            },
        }
    }

    async fn submit_job(&self, api_key: &str, query: &str) -> Result<LiteratureResult, RunnerError> {
        #[derive(Serialize)]
        struct JobRequest<'a> {
            query: &'a str,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawResponse {
            List(Vec<RawJob>),
            Single(RawJob),
        }

        #[derive(Deserialize)]
        struct RawJob {
            job_id: Option<String>,
            narrative: String,
            #[serde(default)]
            citations: Vec<Citation>,
            processing_time: Option<f64>,
        }

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .json(&JobRequest { query })
            .send()
            .await
            .map_err(|e| RunnerError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RunnerError::Auth("provider rejected the API key".to_string()));
        }
        if !response.status().is_success() {
            return Err(RunnerError::Transport(format!("provider returned status {}", response.status())));
        }

        let raw: RawResponse = response.json().await.map_err(|e| RunnerError::Transport(e.to_string()))?;
        let job = match raw {
            RawResponse::List(mut jobs) => {
                if jobs.is_empty() {
                    return Err(RunnerError::NotFound("empty literature response".to_string()));
                }
                jobs.remove(0)
            }
            RawResponse::Single(job) => job,
        };

        let citations = if job.citations.is_empty() {
            extract_citations_from_text(&job.narrative)
        } else {
            job.citations
        };

        Ok(LiteratureResult {
            query: query.to_string(),
            response: job.narrative,
            citations: dedup_citations(citations),
            status: JobStatus::Completed,
            job_id: job.job_id,
            processing_time: job.processing_time.unwrap_or(0.0),
            error: None,
        })
    }
}

/// Parses a `References` section grammar:
/// `N. (key pages X-Y): Authors. Title. Journal, Date. URL: …, doi:….`
fn extract_citations_from_text(text: &str) -> Vec<Citation> {
    let entry_re = Regex::new(
        r"(?m)^\s*\d+\.\s*\([^)]*\):\s*(?P<authors>[^.]+)\.\s*(?P<title>[^.]+)\.\s*(?P<rest>.*)$",
    )
    .unwrap();
    let year_re = Regex::new(r"\b(18|19|20)\d{2}\b").unwrap();
    let doi_re = Regex::new(r"(?i)doi:\s*([^\s,]+)").unwrap();
    let url_re = Regex::new(r"(?i)url:\s*([^\s,]+)").unwrap();

    let mut citations = Vec::new();
    for caps in entry_re.captures_iter(text) {
        let authors: Vec<String> = caps["authors"].split(',').map(|s| s.trim().to_string()).collect();
        let title = caps["title"].trim().to_string();
        let rest = &caps["rest"];

        let year = year_re.find(rest).and_then(|m| m.as_str().parse().ok());
        let doi = doi_re.captures(rest).map(|c| normalize_doi(&c[1]));
        let url = url_re.captures(rest).map(|c| c[1].to_string());

        citations.push(Citation {
            title,
            authors,
            year,
            doi,
            url,
        });
    }
    citations
}

/// Deduplicates by normalized DOI first, then by title prefix when DOI
/// is absent.
fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen_dois = std::collections::HashSet::new();
    let mut seen_title_prefixes = std::collections::HashSet::new();
    let mut result = Vec::new();

    for citation in citations {
        let key = citation.doi.as_ref().map(|d| normalize_doi(d));
        if let Some(doi) = &key {
            if !seen_dois.insert(doi.clone()) {
                continue;
            }
            result.push(citation);
            continue;
        }
        let prefix: String = citation.title.chars().take(40).collect::<String>().to_lowercase();
        if seen_title_prefixes.insert(prefix) {
            result.push(citation);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_without_api_key() {
        let client = LiteratureClient::new(None, LiteratureConfig::default());
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn unavailable_client_fails_fast() {
        let client = LiteratureClient::new(None, LiteratureConfig::default());
        let result = client.search_literature("q", Utc::now()).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().contains("EDISON_API_KEY"));
    }

    #[tokio::test]
    async fn duplicate_query_within_window_is_blocked() {
        let client = LiteratureClient::new(Some("key".to_string()), LiteratureConfig { dedup_window_minutes: 30 });
        let t0 = Utc::now();
        {
            let mut state = client.dedup.lock().unwrap();
            state.in_flight.insert(fingerprint("Q"), t0);
        }

        let result = client.search_literature("Q", t0 + chrono::Duration::seconds(5)).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().contains("Duplicate request blocked"));
    }

    #[tokio::test]
    async fn query_past_dedup_window_is_resubmitted_not_blocked() {
        let client = LiteratureClient::new(Some("key".to_string()), LiteratureConfig { dedup_window_minutes: 30 });
        let t0 = Utc::now();
        {
            let mut state = client.dedup.lock().unwrap();
            state.in_flight.insert(fingerprint("Q"), t0);
        }

        let result = client.search_literature("Q", t0 + chrono::Duration::minutes(30) + chrono::Duration::seconds(1)).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(!result.error.unwrap().contains("Duplicate request blocked"));
    }

    #[tokio::test]
    async fn search_literature_parses_a_live_provider_response() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/literature"))
            .and(header("x-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "job_id": "job-123",
                "narrative": "some synthesis",
                "citations": [{"title": "A Paper", "authors": ["Jane Smith"], "year": 2021, "doi": "10.1/xyz"}],
                "processing_time": 1.5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LiteratureClient::new(Some("key".to_string()), LiteratureConfig { dedup_window_minutes: 30 })
            .with_base_url(format!("{}/v1/literature", server.uri()));

        let result = client.search_literature("some query", Utc::now()).await;

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.job_id.as_deref(), Some("job-123"));
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].title, "A Paper");
    }

    #[tokio::test]
    async fn search_literature_surfaces_auth_error_on_401() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/literature"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = LiteratureClient::new(Some("bad-key".to_string()), LiteratureConfig { dedup_window_minutes: 30 })
            .with_base_url(format!("{}/v1/literature", server.uri()));

        let result = client.search_literature("another query", Utc::now()).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().contains("rejected the API key"));
    }

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let fp = fingerprint("some query");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn extracts_citations_from_references_grammar() {
        let text = "References:\n1. (smith2020 pages 1-5): Smith, J. Title Here. Journal, 2020. url: http://x.test, doi:10.1234/ABCD. This article has 3 citations.\n";
        let citations = extract_citations_from_text(text);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].title, "Title Here");
        assert_eq!(citations[0].year, Some(2020));
        assert_eq!(citations[0].doi.as_deref(), Some("10.1234/abcd"));
    }

    #[test]
    fn dedup_prefers_doi_then_title_prefix() {
        let citations = vec![
            Citation { title: "A".into(), authors: vec![], year: None, doi: Some("10.1/x".into()), url: None },
            Citation { title: "A".into(), authors: vec![], year: None, doi: Some("https://doi.org/10.1/X".into()), url: None },
            Citation { title: "Same Title Here".into(), authors: vec![], year: None, doi: None, url: None },
            Citation { title: "Same Title Here".into(), authors: vec![], year: None, doi: None, url: None },
        ];
        let deduped = dedup_citations(citations);
        assert_eq!(deduped.len(), 2);
    }
}
