//! OpenRouter (OpenAI-compatible) chat completions with structured output.

use super::{user_message, ExtractionRequest, ExtractionService, ServiceResponse};
use crate::config::ExtractionConfig;
use crate::error::{ServiceError, SubmittalError};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const BASE_URL_ENV: &str = "OPENROUTER_BASE_URL";
pub const MODEL_ENV: &str = "GEMINI_MODEL_NAME";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-pro";

/// Name given to the schema in `response_format`.
const SCHEMA_NAME: &str = "submittal_extraction";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    /// OpenRouter reports some upstream failures in a 200 body.
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// OpenRouter-backed extraction service.
#[derive(Debug, Clone)]
pub struct OpenRouterService {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
    http_client: reqwest::Client,
}

impl OpenRouterService {
    /// Build from `OPENROUTER_API_KEY`, `OPENROUTER_BASE_URL` and
    /// `GEMINI_MODEL_NAME`; `config.model` overrides the model variable.
    pub fn from_env(config: &ExtractionConfig) -> Result<Self, SubmittalError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SubmittalError::ServiceNotConfigured {
                service: "openrouter".into(),
                hint: format!("Set {API_KEY_ENV} to an OpenRouter API key."),
            })?;
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = config
            .model
            .clone()
            .or_else(|| std::env::var(MODEL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(api_key, base_url, model, config)
    }

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        config: &ExtractionConfig,
    ) -> Result<Self, SubmittalError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SubmittalError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            timeout_secs: config.request_timeout_secs,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: request.system_prompt.as_str().into(),
                },
                Message {
                    role: "user",
                    content: user_message(&request.chunk_text).into(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema: &request.schema,
                },
            },
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), retry_after, &text));
        }
        parse_completion(&text)
    }

    fn transport_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

impl ExtractionService for OpenRouterService {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ServiceResponse, ServiceError>> {
        self.send(request).boxed()
    }
}

/// Map an HTTP failure onto a [`ServiceError`].
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> ServiceError {
    let detail = snippet(body);
    match status {
        429 => ServiceError::RateLimited { retry_after_secs },
        401 | 403 => ServiceError::Auth(detail),
        408 => ServiceError::Timeout { secs: 0 },
        500..=599 => ServiceError::Server { status, detail },
        _ => ServiceError::BadRequest(format!("HTTP {status}: {detail}")),
    }
}

/// Decode a 200 body into a [`ServiceResponse`].
fn parse_completion(text: &str) -> Result<ServiceResponse, ServiceError> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| ServiceError::Transport(format!("malformed completion envelope: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(classify_status(err.code.unwrap_or(502), None, &err.message));
    }

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServiceError::EmptyResponse("no message content in completion".into()))?;

    let (input_tokens, output_tokens) = parsed
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();
    debug!(
        "Completion: {} chars, {} in / {} out tokens",
        content.len(),
        input_tokens,
        output_tokens
    );

    Ok(ServiceResponse {
        content,
        input_tokens,
        output_tokens,
        model: parsed.model,
    })
}

fn snippet(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(429, Some(30), ""),
            ServiceError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert!(matches!(classify_status(401, None, "bad key"), ServiceError::Auth(_)));
        assert!(matches!(
            classify_status(503, None, "overloaded"),
            ServiceError::Server { status: 503, .. }
        ));
        assert!(matches!(classify_status(400, None, "schema"), ServiceError::BadRequest(_)));
        assert!(classify_status(502, None, "").is_transient());
        assert!(!classify_status(404, None, "").is_transient());
    }

    #[test]
    fn completion_envelope_parses() {
        let body = r#"{
            "model": "google/gemini-2.5-pro",
            "choices": [{"message": {"role": "assistant", "content": "{\"bullets\": []}"}}],
            "usage": {"prompt_tokens": 81234, "completion_tokens": 9120, "total_tokens": 90354}
        }"#;
        let r = parse_completion(body).unwrap();
        assert_eq!(r.content, r#"{"bullets": []}"#);
        assert_eq!(r.input_tokens, 81_234);
        assert_eq!(r.output_tokens, 9_120);
        assert_eq!(r.model.as_deref(), Some("google/gemini-2.5-pro"));
    }

    #[test]
    fn empty_content_is_transient() {
        let body = r#"{"choices": [{"message": {"content": null}}]}"#;
        let err = parse_completion(body).unwrap_err();
        assert!(matches!(err, ServiceError::EmptyResponse(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn in_band_error_is_classified() {
        let body = r#"{"error": {"code": 429, "message": "Provider rate limited"}}"#;
        assert!(matches!(
            parse_completion(body).unwrap_err(),
            ServiceError::RateLimited { .. }
        ));
    }

    #[test]
    fn request_body_uses_strict_schema() {
        let schema = serde_json::json!({"type": "object"});
        let body = ChatRequest {
            model: "m",
            messages: vec![Message {
                role: "system",
                content: "p".into(),
            }],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema: &schema,
                },
            },
            temperature: 0.1,
            max_tokens: 10,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["response_format"]["type"], "json_schema");
        assert_eq!(v["response_format"]["json_schema"]["strict"], true);
        assert_eq!(v["response_format"]["json_schema"]["name"], "submittal_extraction");
    }

    #[test]
    fn snippet_is_char_safe() {
        let long = "é".repeat(400);
        let s = snippet(&long);
        assert!(s.ends_with('…'));
        assert_eq!(s.chars().count(), 301);
    }
}
