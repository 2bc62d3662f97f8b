//! The extraction client: one chunk in, one [`ChunkResult`] out.
//!
//! Sends the request, parses (and if needed repairs) the response, fixes up
//! the bullet hierarchy and prices every attempt. It never returns an
//! error: a chunk that cannot be extracted comes back with `error` set and
//! no bullets, so one bad chunk does not abort the run.
//!
//! ## Retry Strategy
//!
//! Rate limits, timeouts, transport errors and 5xx are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`), re-sending the
//! identical request. A `Retry-After` longer than the backoff wins. Auth and
//! bad-request errors fail at once. A response that arrives but cannot be
//! parsed is not retried: it was paid for, and the same prompt at low
//! temperature tends to produce the same output.

use crate::config::{CostRates, ExtractionConfig};
use crate::error::{ChunkError, ServiceError};
use crate::observer::PipelineObserver;
use crate::output::{ChunkResult, TokenUsage};
use crate::pipeline::plan::ChunkSpec;
use crate::pipeline::repair::{parse_response, sanitize_hierarchy};
use crate::service::{ExtractionRequest, ExtractionService};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Everything needed to extract any chunk of one run.
#[derive(Clone)]
pub struct ExtractionClient {
    service: Arc<dyn ExtractionService>,
    observer: Arc<dyn PipelineObserver>,
    system_prompt: String,
    schema: serde_json::Value,
    max_retries: u32,
    retry_backoff_ms: u64,
    request_timeout_secs: u64,
    rates: CostRates,
    cost_alert_threshold: Option<f64>,
}

impl ExtractionClient {
    pub fn new(
        service: Arc<dyn ExtractionService>,
        observer: Arc<dyn PipelineObserver>,
        system_prompt: impl Into<String>,
        schema: serde_json::Value,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            service,
            observer,
            system_prompt: system_prompt.into(),
            schema,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            request_timeout_secs: config.request_timeout_secs,
            rates: config.rates,
            cost_alert_threshold: config.cost_alert_threshold,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32, last_err: Option<&ServiceError>) -> Duration {
        let exp = self
            .retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let server = last_err
            .and_then(ServiceError::retry_after_secs)
            .map(|s| s.saturating_mul(1000))
            .unwrap_or(0);
        Duration::from_millis(exp.max(server))
    }

    /// Extract one chunk.
    pub async fn extract(&self, spec: &ChunkSpec, chunk_text: String) -> ChunkResult {
        let start = Instant::now();
        let mut result = ChunkResult::empty(spec.index, spec.start_page, spec.end_page);
        let request = ExtractionRequest {
            system_prompt: self.system_prompt.clone(),
            chunk_text,
            schema: self.schema.clone(),
            chunk_index: spec.index,
        };

        let mut last_err: Option<ServiceError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = self.backoff(attempt, last_err.as_ref());
                warn!(
                    "Chunk {}: retry {}/{} after {}ms",
                    spec.index,
                    attempt,
                    self.max_retries,
                    wait.as_millis()
                );
                sleep(wait).await;
            }
            result.attempts = attempt + 1;

            let outcome = timeout(
                Duration::from_secs(self.request_timeout_secs),
                self.service.extract(&request),
            )
            .await
            .unwrap_or(Err(ServiceError::Timeout {
                secs: self.request_timeout_secs,
            }));

            let response = match outcome {
                Ok(response) => response,
                Err(e) if !e.is_transient() => {
                    warn!("Chunk {}: rejected by {}: {}", spec.index, self.service.name(), e);
                    result.error = Some(ChunkError::Rejected {
                        chunk: spec.index,
                        source: e,
                    });
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    return result;
                }
                Err(e) => {
                    warn!("Chunk {}: attempt {} failed: {}", spec.index, attempt + 1, e);
                    last_err = Some(e);
                    continue;
                }
            };

            let usage = TokenUsage {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                cost: self.rates.cost(response.input_tokens, response.output_tokens),
            };
            result.usage.add(&usage);
            if let Some(threshold) = self.cost_alert_threshold {
                if usage.cost > threshold {
                    warn!(
                        "Chunk {}: high cost alert ${:.4} (threshold ${:.2})",
                        spec.index, usage.cost, threshold
                    );
                }
            }
            debug!(
                "Chunk {}: {} input tokens, {} output tokens, ${:.6}",
                spec.index, usage.input_tokens, usage.output_tokens, usage.cost
            );

            self.observer
                .on_raw_response(spec.index, attempt + 1, &response.content);
            result.model = response.model;
            result.raw_response_len = response.content.len();

            match parse_response(&response.content) {
                Ok(parsed) => {
                    let mut bullets = parsed.bullets;
                    result.hierarchy_fixes = sanitize_hierarchy(&mut bullets);
                    result.repaired = !parsed.repairs.is_empty();
                    result.repairs = parsed.repairs;
                    result.bullets = bullets;
                    if result.repaired {
                        info!("Chunk {}: response repaired ({:?})", spec.index, result.repairs);
                    }
                    if result.hierarchy_fixes.total() > 0 {
                        debug!("Chunk {}: hierarchy fixes {:?}", spec.index, result.hierarchy_fixes);
                    }
                }
                Err(detail) => {
                    warn!(
                        "Chunk {}: unrepairable response ({} bytes): {}",
                        spec.index,
                        response.content.len(),
                        detail
                    );
                    result.error = Some(ChunkError::JsonParse {
                        chunk: spec.index,
                        detail,
                        raw_len: response.content.len(),
                    });
                }
            }
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }

        let source = last_err.unwrap_or_else(|| ServiceError::Transport("no attempt was made".into()));
        result.error = Some(ChunkError::Service {
            chunk: spec.index,
            retries: self.max_retries,
            source,
        });
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}
