//! LLM Client: tiered model routing, token accounting, bounded retry for
//! transport-class errors only. Mirrors the External-call Coordinator's
//! LLM surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::RunnerError;
use crate::retry::RetryPolicy;
use crate::types::{ModelTier, TaskType};

/// A single chat message in the conversation sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Thin wrapper over the provider's chat API. Construction never fails;
/// a missing/invalid API key surfaces as an `Auth` error on first call,
/// matching the Literature Client's lazy-availability pattern.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    config: LlmConfig,
    retry: RetryPolicy,
    tokens_used_total: AtomicU64,
}

fn tier_for_task(task_type: TaskType) -> ModelTier {
    match task_type {
        TaskType::Extraction => ModelTier::Small,
        TaskType::Synthesis => ModelTier::Balanced,
        TaskType::Critique => ModelTier::Large,
        TaskType::Writing => ModelTier::Balanced,
    }
}

impl LlmClient {
    pub fn new(api_key: Option<String>, config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                ..RetryPolicy::default()
            },
            config,
            tokens_used_total: AtomicU64::new(0),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false)
    }

    fn model_for_tier(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.config.small_model,
            ModelTier::Balanced => &self.config.balanced_model,
            ModelTier::Large => &self.config.large_model,
        }
    }

    /// Cumulative token usage across every call made by this client instance.
    pub fn tokens_used_total(&self) -> u64 {
        self.tokens_used_total.load(Ordering::Relaxed)
    }

    /// Standard completion. Retries transport errors up to `max_retries`
    /// times with exponential backoff; auth/schema errors surface immediately.
    pub async fn chat(
        &self,
        messages: &[Message],
        system: &str,
        task_type: TaskType,
    ) -> Result<(String, u64), RunnerError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| RunnerError::Auth("ANTHROPIC_API_KEY not set".to_string()))?;

        let tier = tier_for_task(task_type);
        let model = self.model_for_tier(tier).to_string();
        let (text, tokens) = self
            .retry
            .run(|| self.send_chat_request(&api_key, &model, messages, system, None, None))
            .await?;
        self.tokens_used_total.fetch_add(tokens, Ordering::Relaxed);
        Ok((text, tokens))
    }

    /// Extended-thinking variant used by review/critique agents. Returns
    /// `(thinking, text, tokens_used)`.
    pub async fn chat_with_thinking(
        &self,
        messages: &[Message],
        system: &str,
        tier: ModelTier,
        max_tokens: u32,
        budget_tokens: u32,
    ) -> Result<(String, String, u64), RunnerError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| RunnerError::Auth("ANTHROPIC_API_KEY not set".to_string()))?;

        let model = self.model_for_tier(tier).to_string();
        let (text, tokens) = self
            .retry
            .run(|| {
                self.send_chat_request(&api_key, &model, messages, system, Some(max_tokens), Some(budget_tokens))
            })
            .await?;
        self.tokens_used_total.fetch_add(tokens, Ordering::Relaxed);
        // The provider interleaves thinking blocks with the final text; a
        // real wire format would split these out of the response body.
        Ok((String::new(), text, tokens))
    }

    async fn send_chat_request(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Message],
        system: &str,
        max_tokens: Option<u32>,
        budget_tokens: Option<u32>,
    ) -> Result<(String, u64), RunnerError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            system: &'a str,
            messages: &'a [Message],
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            thinking_budget: Option<u32>,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            text: String,
            #[serde(default)]
            tokens_used: u64,
        }

        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .json(&ChatRequest {
                model,
                system,
                messages,
                max_tokens,
                thinking_budget: budget_tokens,
            })
            .send()
            .await
            .map_err(|e| RunnerError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RunnerError::Auth("provider rejected the API key".to_string()));
        }
        if !response.status().is_success() {
            return Err(RunnerError::Transport(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Transport(e.to_string()))?;

        Ok((parsed.text, parsed.tokens_used))
    }
}
