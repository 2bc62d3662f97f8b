//! Configuration types for submittal extraction.
//!
//! Every run is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Defaults match the numbers the pipeline was
//! tuned against (530 tokens per page, 100 000 tokens per chunk, Gemini 2.5
//! Pro pricing).

use crate::error::SubmittalError;
use crate::observer::PipelineObserver;
use crate::service::ExtractionService;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use submittal_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_tokens_per_chunk(80_000)
///     .concurrency(2)
///     .cost_ceiling(5.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Documents estimated at or below this many tokens go out as one
    /// request. Default: 100 000.
    pub split_threshold_tokens: usize,

    /// Average tokens per specification page. Default: 530.
    ///
    /// Measured on CSI-format project manuals; dense tabular sections run
    /// higher, cover sheets far lower. Only used for planning.
    pub tokens_per_page_estimate: usize,

    /// Token budget for a single chunk once splitting kicks in. Default: 100 000.
    pub max_tokens_per_chunk: usize,

    /// Maximum retry attempts on a transient service failure. Default: 3.
    ///
    /// Rate limits, timeouts, transport errors and 5xx responses are
    /// retried; auth and bad-request errors fail the chunk immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds. Default: 1000.
    ///
    /// Doubles after each attempt: 1 s → 2 s → 4 s. A larger `Retry-After`
    /// from the service wins.
    pub retry_backoff_ms: u64,

    /// Wall-clock limit for one service request in seconds. Default: 300.
    pub request_timeout_secs: u64,

    /// Stop dispatching new chunks once the run has spent more than this
    /// many USD. Default: none.
    pub cost_ceiling: Option<f64>,

    /// Log a warning when a single response costs more than this. Default: 10.0.
    pub cost_alert_threshold: Option<f64>,

    /// Chunks in flight at once. Default: 1 (sequential).
    pub concurrency: usize,

    /// Model identifier. If None, the service's default is used
    /// (`GEMINI_MODEL_NAME`, then `google/gemini-2.5-pro` for OpenRouter).
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "openai", "gemini", "ollama").
    /// When set, the provider path is used instead of OpenRouter.
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake-llm provider.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extraction service. Takes precedence over everything
    /// else; this is how tests inject a scripted service.
    pub service: Option<Arc<dyn ExtractionService>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output token cap per request. Default: 65 536.
    ///
    /// A register for a 190-page chunk easily runs past 30 000 output
    /// tokens; a low cap truncates the JSON mid-array.
    pub max_output_tokens: usize,

    /// Token prices used for cost accounting.
    pub rates: CostRates,

    /// Custom system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Custom response schema. If None, uses [`crate::schema::default_schema`].
    pub schema: Option<serde_json::Value>,

    /// Restrict the run to an inclusive page range. Default: whole document.
    pub pages: Option<PageRange>,

    /// Write raw responses and chunk documents here. Default: none.
    pub debug_dir: Option<PathBuf>,

    /// Run event observer. Default: none.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            split_threshold_tokens: 100_000,
            tokens_per_page_estimate: 530,
            max_tokens_per_chunk: 100_000,
            max_retries: 3,
            retry_backoff_ms: 1000,
            request_timeout_secs: 300,
            cost_ceiling: None,
            cost_alert_threshold: Some(10.0),
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            service: None,
            temperature: 0.1,
            max_output_tokens: 65_536,
            rates: CostRates::default(),
            system_prompt: None,
            schema: None,
            pages: None,
            debug_dir: None,
            observer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("split_threshold_tokens", &self.split_threshold_tokens)
            .field("tokens_per_page_estimate", &self.tokens_per_page_estimate)
            .field("max_tokens_per_chunk", &self.max_tokens_per_chunk)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cost_ceiling", &self.cost_ceiling)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("rates", &self.rates)
            .field("pages", &self.pages)
            .field("debug_dir", &self.debug_dir)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of pages that fit in one chunk, never less than one.
    pub fn pages_per_chunk(&self) -> usize {
        (self.max_tokens_per_chunk / self.tokens_per_page_estimate.max(1)).max(1)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn split_threshold_tokens(mut self, n: usize) -> Self {
        self.config.split_threshold_tokens = n;
        self
    }

    pub fn tokens_per_page_estimate(mut self, n: usize) -> Self {
        self.config.tokens_per_page_estimate = n;
        self
    }

    pub fn max_tokens_per_chunk(mut self, n: usize) -> Self {
        self.config.max_tokens_per_chunk = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn cost_ceiling(mut self, usd: f64) -> Self {
        self.config.cost_ceiling = Some(usd);
        self
    }

    pub fn cost_alert_threshold(mut self, usd: Option<f64>) -> Self {
        self.config.cost_alert_threshold = usd;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn service(mut self, service: Arc<dyn ExtractionService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn rates(mut self, rates: CostRates) -> Self {
        self.config.rates = rates;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn schema(mut self, schema: serde_json::Value) -> Self {
        self.config.schema = Some(schema);
        self
    }

    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = Some(range);
        self
    }

    pub fn debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.debug_dir = Some(dir.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, SubmittalError> {
        let c = &self.config;
        if c.tokens_per_page_estimate == 0 {
            return Err(SubmittalError::InvalidConfig(
                "tokens_per_page_estimate must be ≥ 1".into(),
            ));
        }
        if c.max_tokens_per_chunk == 0 {
            return Err(SubmittalError::InvalidConfig(
                "max_tokens_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(SubmittalError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(SubmittalError::InvalidConfig(
                "request_timeout_secs must be ≥ 1".into(),
            ));
        }
        if let Some(ceiling) = c.cost_ceiling {
            if !(ceiling.is_finite() && ceiling > 0.0) {
                return Err(SubmittalError::InvalidConfig(format!(
                    "cost_ceiling must be a positive amount, got {ceiling}"
                )));
            }
        }
        if c.rates.input_per_million < 0.0 || c.rates.output_per_million < 0.0 {
            return Err(SubmittalError::InvalidConfig("Token rates cannot be negative".into()));
        }
        if let Some(range) = c.pages {
            range.validate()?;
        }
        if let Some(schema) = &c.schema {
            if !schema.is_object() {
                return Err(SubmittalError::InvalidConfig(
                    "schema must be a JSON object".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Supporting types ─────────────────────────────────────────────────────

/// Token prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for CostRates {
    /// Gemini 2.5 Pro list price.
    fn default() -> Self {
        Self {
            input_per_million: 1.25,
            output_per_million: 10.0,
        }
    }
}

impl CostRates {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// An inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    fn validate(&self) -> Result<(), SubmittalError> {
        if self.start == 0 || self.end < self.start {
            return Err(SubmittalError::InvalidConfig(format!(
                "Invalid page range {}-{}: pages are 1-indexed and start must not exceed end",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Check the range against a document's page count.
    pub fn within(&self, page_count: usize) -> Result<(), SubmittalError> {
        self.validate()?;
        if self.end > page_count {
            return Err(SubmittalError::PageOutOfRange {
                page: self.end,
                total: page_count,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PageRange {
    type Err = String;

    /// Parses `"5"` or `"120-190"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<usize>()
                .map_err(|_| format!("'{}' is not a page number", p.trim()))
        };
        let range = match s.split_once('-') {
            Some((a, b)) => PageRange::new(parse(a)?, parse(b)?),
            None => {
                let p = parse(s)?;
                PageRange::new(p, p)
            }
        };
        range.validate().map_err(|e| e.to_string())?;
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.tokens_per_page_estimate, 530);
        assert_eq!(c.max_tokens_per_chunk, 100_000);
        assert_eq!(c.split_threshold_tokens, 100_000);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.request_timeout_secs, 300);
        assert_eq!(c.pages_per_chunk(), 188);
    }

    #[test]
    fn builder_rejects_zero_token_estimate() {
        let err = ExtractionConfig::builder()
            .tokens_per_page_estimate(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SubmittalError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_bad_ceiling() {
        assert!(ExtractionConfig::builder().cost_ceiling(0.0).build().is_err());
        assert!(ExtractionConfig::builder().cost_ceiling(f64::NAN).build().is_err());
        assert!(ExtractionConfig::builder().cost_ceiling(2.0).build().is_ok());
    }

    #[test]
    fn concurrency_is_clamped() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn cost_uses_per_million_rates() {
        let rates = CostRates::default();
        let cost = rates.cost(1_000_000, 100_000);
        assert!((cost - 2.25).abs() < 1e-9);
        assert_eq!(rates.cost(0, 0), 0.0);
    }

    #[test]
    fn page_range_parses() {
        assert_eq!("120-190".parse::<PageRange>().unwrap(), PageRange::new(120, 190));
        assert_eq!("7".parse::<PageRange>().unwrap(), PageRange::new(7, 7));
        assert!("0-4".parse::<PageRange>().is_err());
        assert!("9-3".parse::<PageRange>().is_err());
        assert!("a-b".parse::<PageRange>().is_err());
    }

    #[test]
    fn page_range_within_document() {
        let r = PageRange::new(100, 250);
        let err = r.within(200).unwrap_err();
        assert!(matches!(err, SubmittalError::PageOutOfRange { page: 250, total: 200 }));
        assert!(r.within(250).is_ok());
        assert_eq!(r.len(), 151);
    }
}
