//! The extraction service seam.
//!
//! The pipeline talks to the model through [`ExtractionService`]: one
//! request carrying the system prompt, the chunk text and the response
//! schema; one response carrying the raw content and token counts. The
//! trait is object safe so a run holds an `Arc<dyn ExtractionService>` and
//! tests can script responses without any network.
//!
//! Two implementations ship:
//!
//! * [`OpenRouterService`]: OpenAI-compatible `/chat/completions` with a
//!   strict `json_schema` response format. Default.
//! * [`ProviderService`]: any `edgequake_llm` provider, with the schema
//!   embedded in the system message.

pub mod openrouter;
pub mod provider;

pub use openrouter::OpenRouterService;
pub use provider::ProviderService;

use crate::config::ExtractionConfig;
use crate::error::{ServiceError, SubmittalError};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// One extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub system_prompt: String,
    pub chunk_text: String,
    pub schema: serde_json::Value,
    /// For logging only; services must not change behaviour on it.
    pub chunk_index: usize,
}

/// What the service sent back.
#[derive(Debug, Clone, Default)]
pub struct ServiceResponse {
    /// Raw message content, expected to be JSON.
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model that actually served the request, when reported.
    pub model: Option<String>,
}

/// An LLM endpoint able to answer an [`ExtractionRequest`].
pub trait ExtractionService: Send + Sync {
    /// Short label for logs and error messages.
    fn name(&self) -> &str;

    /// Send one request. Implementations do not retry; the extraction
    /// client owns retry policy.
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ServiceResponse, ServiceError>>;
}

/// The user message wrapping a chunk's text.
pub fn user_message(chunk_text: &str) -> String {
    format!(
        "Extract submittal requirements from this construction specification document:\n\n{}",
        chunk_text
    )
}

/// Resolve the extraction service, from most-specific to least-specific.
///
/// 1. A pre-built [`ExtractionService`] on the config.
/// 2. A pre-built `edgequake_llm` provider on the config.
/// 3. `provider_name` (+ `model`) through [`ProviderFactory`].
/// 4. `OPENROUTER_API_KEY` in the environment → [`OpenRouterService`].
/// 5. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, then full
///    auto-detection with [`ProviderFactory::from_env`].
pub fn resolve_service(config: &ExtractionConfig) -> Result<Arc<dyn ExtractionService>, SubmittalError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }

    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderService::new(Arc::clone(provider), config)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(openrouter::DEFAULT_MODEL);
        let provider = create_provider(name, model)?;
        return Ok(Arc::new(ProviderService::new(provider, config)));
    }

    if std::env::var(openrouter::API_KEY_ENV).is_ok_and(|k| !k.is_empty()) {
        debug!("Using OpenRouter service");
        return Ok(Arc::new(OpenRouterService::from_env(config)?));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = create_provider(&prov, &model)?;
            return Ok(Arc::new(ProviderService::new(provider, config)));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SubmittalError::ServiceNotConfigured {
            service: "auto".to_string(),
            hint: format!(
                "Set OPENROUTER_API_KEY, or configure an LLM provider \
                (OPENAI_API_KEY, GEMINI_API_KEY, …).\nError: {}",
                e
            ),
        })?;
    Ok(Arc::new(ProviderService::new(provider, config)))
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, SubmittalError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| SubmittalError::ServiceNotConfigured {
        service: name.to_string(),
        hint: format!("{e}"),
    })
}
