//! Configuration for the tender pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ExtractionLanguage;

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Generation service configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Chunking and extraction configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Document download and parsing configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Legacy format converter configuration
    #[serde(default)]
    pub converter: ConverterConfig,
    /// Stage selection and batch configuration
    #[serde(default)]
    pub stages: StageConfig,
}

impl PipelineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.llm.apply_env();
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.extraction.context_window <= self.extraction.response_tokens {
            return Err(Error::Config(format!(
                "extraction.context_window ({}) must exceed extraction.response_tokens ({})",
                self.extraction.context_window, self.extraction.response_tokens
            )));
        }
        if self.stages.batch_concurrency == 0 {
            return Err(Error::Config(
                "stages.batch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.ingestion.preview_blocks == 0 {
            return Err(Error::Config(
                "ingestion.preview_blocks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which generation backend to call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// OpenAI-compatible chat completions with function calling
    #[default]
    OpenAi,
    /// Ollama chat API with JSON schema output
    Ollama,
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key, also read from OPENAI_API_KEY
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Generation model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_model() -> String { "gpt-4o".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_timeout() -> u64 { 180 }
fn default_max_retries() -> u32 { 2 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAi,
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    /// Fill the API key from the environment when the file leaves it out
    pub fn apply_env(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
    }
}

/// When the chunk budget is computed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Once per document, against the aggregate as it was before the document
    #[default]
    PerDocument,
    /// Before every chunk, against the aggregate as it is at that point
    PerChunk,
}

/// Chunking and extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Model context window in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Tokens reserved for the reply
    #[serde(default = "default_response_tokens")]
    pub response_tokens: usize,
    /// HuggingFace tokenizer.json; word segmentation is used when absent
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default)]
    pub budget_policy: BudgetPolicy,
    /// Language of human-readable summaries
    #[serde(default)]
    pub language: ExtractionLanguage,
    /// Name of the function the generation service is forced to call
    #[serde(default = "default_function_name")]
    pub function_name: String,
    /// Replace the built-in system prompt
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
    /// Ask the generation service to pick relevant documents first
    #[serde(default)]
    pub select_documents: bool,
    /// Skip documents without extracted text instead of sending an empty chunk
    #[serde(default)]
    pub skip_empty_documents: bool,
}

fn default_context_window() -> usize { 128_000 }
fn default_response_tokens() -> usize { 4_000 }
fn default_function_name() -> String { "extract_comprehensive_tender_data".to_string() }

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            response_tokens: default_response_tokens(),
            tokenizer_path: None,
            budget_policy: BudgetPolicy::PerDocument,
            language: ExtractionLanguage::Czech,
            function_name: default_function_name(),
            system_prompt_path: None,
            select_documents: false,
            skip_empty_documents: false,
        }
    }
}

/// Document download and parsing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Download timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// Largest accepted download (default: 200MB)
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    /// Number of text blocks kept in a preview
    #[serde(default = "default_preview_blocks")]
    pub preview_blocks: usize,
    /// PDF text extraction timeout before falling back to lopdf
    #[serde(default = "default_pdf_timeout")]
    pub pdf_timeout_secs: u64,
}

fn default_download_timeout() -> u64 { 120 }
fn default_max_download_bytes() -> u64 { 200 * 1024 * 1024 }
fn default_preview_blocks() -> usize { 5 }
fn default_pdf_timeout() -> u64 { 60 }

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: default_download_timeout(),
            max_download_bytes: default_max_download_bytes(),
            preview_blocks: default_preview_blocks(),
            pdf_timeout_secs: default_pdf_timeout(),
        }
    }
}

/// Legacy Word converter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Convert .doc files with LibreOffice (default: true)
    #[serde(default = "default_converter_enabled")]
    pub enabled: bool,
    /// LibreOffice executable
    #[serde(default = "default_converter_binary")]
    pub binary: String,
    /// Seconds before a conversion is killed
    #[serde(default = "default_converter_timeout")]
    pub timeout_secs: u64,
}

fn default_converter_enabled() -> bool { true }
fn default_converter_binary() -> String { "libreoffice".to_string() }
fn default_converter_timeout() -> u64 { 120 }

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enabled: default_converter_enabled(),
            binary: default_converter_binary(),
            timeout_secs: default_converter_timeout(),
        }
    }
}

/// Stage selection and batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub skip_documents: bool,
    #[serde(default)]
    pub skip_semantic: bool,
    #[serde(default)]
    pub skip_indexing: bool,
    /// Tenders processed concurrently by a batch run
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_batch_concurrency() -> usize { 4 }

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            skip_documents: false,
            skip_semantic: false,
            skip_indexing: false,
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction.context_window, 128_000);
        assert_eq!(config.extraction.budget_policy, BudgetPolicy::PerDocument);
        assert_eq!(config.ingestion.preview_blocks, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [llm]
            provider = "ollama"
            base_url = "http://localhost:11434"
            model = "llama3.1"

            [extraction]
            context_window = 8192
            budget_policy = "per_chunk"
            language = "english"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProviderKind::Ollama);
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.extraction.context_window, 8192);
        assert_eq!(config.extraction.response_tokens, 4_000);
        assert_eq!(config.extraction.budget_policy, BudgetPolicy::PerChunk);
        assert_eq!(config.extraction.language, ExtractionLanguage::English);
        assert!(config.converter.enabled);
    }

    #[test]
    fn test_validate_rejects_impossible_budget() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [extraction]
            context_window = 100
            response_tokens = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
