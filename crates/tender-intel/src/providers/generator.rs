//! Structured generation trait for contract-bound extraction

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::{Error, Result};
use crate::extraction::accumulate::ExtractionFragment;
use crate::extraction::schema::ExtractionContract;

use super::ollama::OllamaGenerator;
use super::openai::OpenAiGenerator;

/// Trait for generation services that answer with a contract-shaped object
///
/// Implementations:
/// - `OpenAiGenerator`: OpenAI-compatible chat completions with a forced tool call
/// - `OllamaGenerator`: Ollama chat API constrained by a JSON schema
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Run one generation call and decode its reply into a fragment
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        contract: &ExtractionContract,
    ) -> Result<ExtractionFragment>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

/// Build the generator selected by `config.provider`
pub fn generator_from_config(config: &LlmConfig) -> Result<Arc<dyn StructuredGenerator>> {
    let generator: Arc<dyn StructuredGenerator> = match config.provider {
        LlmProviderKind::OpenAi => Arc::new(OpenAiGenerator::new(config)?),
        LlmProviderKind::Ollama => Arc::new(OllamaGenerator::new(config)?),
    };
    tracing::info!(
        "Using {} generator with model {}",
        generator.name(),
        generator.model()
    );
    Ok(generator)
}

/// Run `operation` up to `max_retries + 1` times with exponential backoff
pub async fn retry_request<F, Fut, T>(max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_retries {
                    let delay = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::llm("Unknown error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_gives_up_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_request(0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::llm("down")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Llm(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = retry_request(2, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(Error::llm("busy"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_generator_from_config() {
        let config = LlmConfig {
            provider: LlmProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            ..Default::default()
        };
        let generator = generator_from_config(&config).unwrap();
        assert_eq!(generator.name(), "ollama");
        assert_eq!(generator.model(), "llama3.1");
    }
}
