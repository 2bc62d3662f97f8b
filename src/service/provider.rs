//! Extraction through any `edgequake_llm` provider.
//!
//! Providers behind this facade do not share a structured-output switch,
//! so the schema travels inside the system message and the repair stage
//! deals with whatever comes back.

use super::{user_message, ExtractionRequest, ExtractionService, ServiceResponse};
use crate::config::ExtractionConfig;
use crate::error::ServiceError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Extraction service backed by an `edgequake_llm` provider.
pub struct ProviderService {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn send(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError> {
        let messages = vec![
            ChatMessage::system(system_with_schema(&request.system_prompt, &request.schema)),
            ChatMessage::user(user_message(&request.chunk_text)),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| classify_message(&e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(ServiceError::EmptyResponse("provider returned no content".into()));
        }
        Ok(ServiceResponse {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
            model: self.model.clone(),
        })
    }
}

impl ExtractionService for ProviderService {
    fn name(&self) -> &str {
        "edgequake-llm"
    }

    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ServiceResponse, ServiceError>> {
        self.send(request).boxed()
    }
}

/// System prompt followed by the schema the answer must satisfy.
fn system_with_schema(prompt: &str, schema: &serde_json::Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{prompt}\n\nRespond with a single JSON object and nothing else. \
        It must validate against this JSON schema:\n{schema_text}"
    )
}

static STATUS_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

/// Best-effort mapping of a provider error message onto a [`ServiceError`].
///
/// Provider errors arrive as text, so this keys on the first whole-word
/// 4xx/5xx status code and the usual wording. Client errors are checked
/// before server errors: token counts in a context-length message must not
/// read as a 5xx.
pub fn classify_message(message: &str) -> ServiceError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let status = STATUS_CODE
        .captures(&lower)
        .and_then(|c| c[1].parse::<u16>().ok());
    let client = status.filter(|s| (400..500).contains(s));

    if client == Some(429) || has(&["rate limit", "rate-limit", "too many requests", "quota"]) {
        ServiceError::RateLimited {
            retry_after_secs: None,
        }
    } else if matches!(client, Some(401 | 403))
        || has(&["unauthorized", "forbidden", "invalid api key", "authentication"])
    {
        ServiceError::Auth(message.to_string())
    } else if client.is_some_and(|s| s != 408)
        || has(&["invalid request", "bad request", "context length", "context window"])
    {
        ServiceError::BadRequest(message.to_string())
    } else if client == Some(408) || has(&["timed out", "timeout", "deadline"]) {
        ServiceError::Timeout { secs: 0 }
    } else if status.is_some()
        || has(&["overloaded", "internal server error", "bad gateway", "service unavailable"])
    {
        ServiceError::Server {
            status: status.unwrap_or(500),
            detail: message.to_string(),
        }
    } else {
        ServiceError::Transport(message.to_string())
    }
}
