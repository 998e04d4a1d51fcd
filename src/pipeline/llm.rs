//! LLM transport: one chat completion with timeout, retry, and backoff.
//!
//! All prompt wording lives in [`crate::prompts`]; all interpretation of
//! the reply lives in [`crate::pipeline::response`]. This module only moves
//! text to the provider and back.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^(attempt - 1)`): with 500 ms base
//! and 3 retries the waits are 500 ms → 1 s → 2 s. A call that exceeds
//! `api_timeout_secs` counts as a failed attempt.

use crate::config::AnalysisConfig;
use crate::error::Tei2MdError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Attempts that failed before this one succeeded.
    pub retries: u32,
    pub duration_ms: u64,
}

/// Send a system + user message pair and return the reply text.
///
/// # Errors
/// [`Tei2MdError::LlmApiError`] once every attempt has failed.
pub async fn complete(
    provider: &Arc<dyn LLMProvider>,
    system_prompt: &str,
    user_prompt: &str,
    config: &AnalysisConfig,
) -> Result<LlmReply, Tei2MdError> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_prompt),
    ];
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs.max(1));

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Analysis call: retry {}/{} after {}ms",
                attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                debug!(
                    "Analysis call: {} input tokens, {} output tokens, {:?}",
                    response.prompt_tokens, response.completion_tokens, duration
                );
                return Ok(LlmReply {
                    content: response.content,
                    prompt_tokens: response.prompt_tokens as u64,
                    completion_tokens: response.completion_tokens as u64,
                    retries: attempt,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Ok(Err(e)) => {
                let msg = format!("{}", e);
                warn!("Analysis call: attempt {} failed: {}", attempt + 1, msg);
                last_err = Some(msg);
            }
            Err(_) => {
                let msg = format!("timed out after {}s", call_timeout.as_secs());
                warn!("Analysis call: attempt {} {}", attempt + 1, msg);
                last_err = Some(msg);
            }
        }
    }

    Err(Tei2MdError::LlmApiError {
        retries: config.max_retries,
        message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
