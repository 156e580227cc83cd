//! Model interaction: send a page image with the extraction prompt, retrying
//! rate limits and transient failures.
//!
//! The loop depends on the [`ModelBackend`] trait rather than on a provider
//! directly. [`ProviderBackend`] adapts any `edgequake-llm` provider (Gemini
//! by default); tests substitute scripted backends.
//!
//! ## Retry Strategy
//!
//! Provider failures are classified from their message, the same way the
//! hosted APIs report them (`429`, `RESOURCE_EXHAUSTED`, `503`, …):
//!
//! | Class | Retried | Outcome when retries run out |
//! |-------|---------|------------------------------|
//! | [`BackendError::RateLimited`] | yes | page skipped or run aborted |
//! | [`BackendError::Transient`]   | yes | page skipped or run aborted |
//! | [`BackendError::Rejected`]    | no  | page skipped or run aborted |
//! | [`BackendError::Unauthorized`]| no  | run aborted |
//!
//! Waits grow as `retry_backoff_ms * 2^(attempt-1)`: with the 5 s default
//! and 4 retries that is 5 s → 10 s → 20 s → 40 s, enough to ride out a
//! per-minute quota window.

use crate::config::{ExtractionConfig, DEFAULT_PROVIDER};
use crate::error::BudgetError;
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Text and token usage of one model answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A classified model-call failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Classify a provider error message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let upper = message.to_ascii_uppercase();
        let has = |needle: &str| upper.contains(needle);

        if has("429") || has("RESOURCE_EXHAUSTED") || has("RATE LIMIT") || has("RATELIMIT") || has("QUOTA") {
            BackendError::RateLimited(message)
        } else if has("401")
            || has("403")
            || has("UNAUTHENTICATED")
            || has("PERMISSION_DENIED")
            || has("API KEY")
            || has("API_KEY")
        {
            BackendError::Unauthorized(message)
        } else if has("500")
            || has("502")
            || has("503")
            || has("504")
            || has("UNAVAILABLE")
            || has("OVERLOADED")
            || has("TIMED OUT")
            || has("TIMEOUT")
            || has("CONNECTION")
        {
            BackendError::Transient(message)
        } else {
            BackendError::Rejected(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::RateLimited(_) | BackendError::Transient(_))
    }
}

/// Anything that can answer a chat request.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ModelReply, BackendError>;
}

/// [`ModelBackend`] over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ModelBackend for ProviderBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ModelReply, BackendError> {
        let response = self
            .provider
            .chat(messages, Some(options))
            .await
            .map_err(|e| BackendError::classify(e.to_string()))?;
        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// Resolve the backend: a pre-built one, else a named provider + model.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn ModelBackend>, BudgetError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let provider_name = config.provider_or_default();
    let model = config.model_or_default();

    if provider_name == DEFAULT_PROVIDER && std::env::var("GEMINI_API_KEY").map_or(true, |k| k.is_empty()) {
        return Err(BudgetError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: "Set GEMINI_API_KEY (a .env file in the working directory is read too).".into(),
        });
    }

    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BudgetError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    debug!("Using provider '{}' with model '{}'", provider_name, model);
    Ok(Arc::new(ProviderBackend::new(provider)))
}

/// A reply together with how many retries it took.
#[derive(Debug, Clone)]
pub struct Answered {
    pub reply: ModelReply,
    pub retries: u32,
}

/// The last error once retries are exhausted (or a non-retryable error).
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub error: BackendError,
    pub attempts: u32,
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(16);
    base_ms.saturating_mul(1u64 << exp)
}

/// Send `messages`, retrying retryable failures with exponential backoff.
///
/// `on_retry(attempt, wait_ms)` fires before each wait.
pub async fn call_with_retry(
    backend: &dyn ModelBackend,
    label: &str,
    messages: &[ChatMessage],
    config: &ExtractionConfig,
    on_retry: impl Fn(u32, u64),
) -> Result<Answered, CallFailure> {
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut attempt = 0u32;

    loop {
        let result = match timeout(call_timeout, backend.chat(messages, &options)).await {
            Ok(r) => r,
            Err(_) => Err(BackendError::Transient(format!(
                "timed out after {}s",
                config.api_timeout_secs
            ))),
        };

        match result {
            Ok(mut reply) => {
                reply.content = reply.content.trim().to_string();
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    label, reply.input_tokens, reply.output_tokens
                );
                return Ok(Answered {
                    reply,
                    retries: attempt,
                });
            }
            Err(error) if error.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let wait = backoff_delay_ms(config.retry_backoff_ms, attempt);
                warn!(
                    "{}: {} — waiting {}ms (retry {}/{})",
                    label, error, wait, attempt, config.max_retries
                );
                on_retry(attempt, wait);
                sleep(Duration::from_millis(wait)).await;
            }
            Err(error) => {
                warn!("{}: giving up after {} attempt(s) — {}", label, attempt + 1, error);
                return Err(CallFailure {
                    error,
                    attempts: attempt + 1,
                });
            }
        }
    }
}

/// Ask the model to extract one page image.
///
/// Message layout: the extraction prompt as the system message (or the
/// configured override), then a user turn carrying the page PNG.
pub async fn request_page(
    backend: &dyn ModelBackend,
    page_num: usize,
    image: ImageData,
    config: &ExtractionConfig,
    on_retry: impl Fn(u32, u64),
) -> Result<Answered, CallFailure> {
    let prompt = config.system_prompt.as_deref().unwrap_or(EXTRACTION_PROMPT);
    let messages = vec![
        ChatMessage::system(prompt),
        ChatMessage::user_with_images(&format!("Budget page {page_num}"), vec![image]),
    ];
    call_with_retry(backend, &format!("Page {page_num}"), &messages, config, on_retry).await
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
