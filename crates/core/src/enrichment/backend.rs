//! Backend adapter trait and the closed failure taxonomy.
//!
//! Grounded on `other_examples/.../llm-registry-core-src-execution.rs`'s
//! uniform adapter shape: one async `complete` entrypoint, a structured
//! result carrying tokens/latency, and a typed failure instead of a bare
//! string error.

use crate::error::BackendFailureKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// The fixed schema every backend response is parsed against. Field names
/// match `Enrichment` exactly so a successful parse converts directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawCompletion {
    pub summary: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub side_effects: Vec<String>,
    #[serde(default)]
    pub pitfalls: Vec<String>,
    #[serde(default)]
    pub usage_snippet: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub raw: RawCompletion,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency: Duration,
}

/// One backend attempt's result: `Ok` on success, or the specific failure
/// kind driving the cascade state machine.
pub type BackendResult = Result<CompletionOutcome, BackendFailureKind>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Declared tier label, e.g. `local-7b`, `remote-premium`.
    fn tier(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> BackendResult;
}

/// OpenAI-compatible chat-completion backend (local inference server or a
/// hosted OpenAI-compatible endpoint — the same wire shape serves both).
pub struct OpenAiCompatibleBackend {
    tier: String,
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(tier: String, url: String, model: String, api_key: Option<String>) -> Self {
        OpenAiCompatibleBackend { tier, url, model, api_key, client: reqwest::Client::new() }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl Backend for OpenAiCompatibleBackend {
    fn tier(&self) -> &str {
        &self.tier
    }

    async fn complete(&self, request: CompletionRequest) -> BackendResult {
        let started = std::time::Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: &request.prompt }],
            max_tokens: request.max_tokens,
        };

        let mut req = self.client.post(&self.url).json(&body).timeout(request.timeout);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendFailureKind::AuthError);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendFailureKind::RateLimited);
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(BackendFailureKind::Overloaded);
        }
        if !status.is_success() {
            return Err(BackendFailureKind::TransportError);
        }

        let parsed: ChatResponse = response.json().await.map_err(|_| BackendFailureKind::ValidationFailed)?;
        let content = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        let raw: RawCompletion = serde_json::from_str(&content).map_err(|_| BackendFailureKind::ValidationFailed)?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(CompletionOutcome {
            raw,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            latency: started.elapsed(),
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> BackendFailureKind {
    if e.is_timeout() {
        BackendFailureKind::Timeout
    } else {
        BackendFailureKind::TransportError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_completion_parses_minimal_json() {
        let json = r#"{"summary": "does X", "inputs": ["a"], "outputs": ["b"]}"#;
        let parsed: RawCompletion = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.summary, "does X");
        assert!(parsed.side_effects.is_empty());
    }
}
