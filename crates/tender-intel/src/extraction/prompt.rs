//! Prompt construction for chunk-by-chunk extraction

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::ExtractionLanguage;

/// Builds the system prompt and the per-chunk user prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    /// Built-in system prompt for `language`
    pub fn new(language: ExtractionLanguage, function_name: &str) -> Self {
        Self {
            system_prompt: default_system_prompt(language, function_name),
        }
    }

    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Built-in prompt, or the file named by `system_prompt_path`
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        match &config.system_prompt_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!(
                        "Failed to read system prompt {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!("Using system prompt from {}", path.display());
                Ok(Self::with_system_prompt(text))
            }
            None => Ok(Self::new(config.language, &config.function_name)),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// User prompt with everything but the chunk text, used for budgeting
    pub fn template(&self, metadata: &str, aggregate: &str, document_name: &str) -> String {
        self.user_prompt(metadata, aggregate, document_name, 0, 0, "")
    }

    /// User prompt for chunk `index` (zero-based) of `total`
    pub fn user_prompt(
        &self,
        metadata: &str,
        aggregate: &str,
        document_name: &str,
        index: usize,
        total: usize,
        chunk: &str,
    ) -> String {
        format!(
            "Tender Metadata:\n{metadata}\n\n\
             Previously Extracted Information (to enrich and build upon):\n{aggregate}\n\n\
             Current Document Chunk (Document: {document_name}, Chunk {}/{total}):\n{chunk}",
            index + 1
        )
    }
}

fn default_system_prompt(language: ExtractionLanguage, function_name: &str) -> String {
    let lang = language.display_name();
    format!(
        "You are a procurement analyst extracting structured intelligence from public tender \
documentation. You receive the tender's metadata, the information extracted so far and one \
chunk of one tender document at a time.

Your task:
- Read the current chunk and return every fact it adds about the tender.
- Build on the previously extracted information: keep what is still correct, complete what is \
missing and correct what the chunk contradicts.
- Leave a field empty when the chunk says nothing about it. Do not invent values.
- Write summaries, justifications and descriptions in {lang}. Write tags in lowercase English \
using standard names for technologies, domains, services and certifications.
- Searchable keywords should cover both Czech and English terms.

Scores use a 0-10 scale:
- technical complexity: 0-2 routine work, 5-6 moderate challenges, 9-10 research-level work
- financial attractiveness: value, payment terms and financial risk together
- competition intensity: 0-2 few qualified bidders, 8-10 many qualified bidders
- urgency: pressure from the deadline and delivery timeline

Set extraction_confidence_score between 0 and 1 to reflect how well this chunk supports \
the values you return.

Always answer by calling {function_name}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_layout() {
        let builder = PromptBuilder::with_system_prompt("sys");
        let prompt = builder.user_prompt("{\"title\": \"T\"}", "{}", "zadani.pdf", 1, 3, "chunk text");
        assert!(prompt.starts_with("Tender Metadata:\n{\"title\": \"T\"}"));
        assert!(prompt.contains("Chunk 2/3"));
        assert!(prompt.ends_with("chunk text"));
    }

    #[test]
    fn test_template_is_prompt_without_chunk() {
        let builder = PromptBuilder::with_system_prompt("sys");
        let template = builder.template("{}", "{}", "a.pdf");
        let prompt = builder.user_prompt("{}", "{}", "a.pdf", 0, 0, "text");
        assert_eq!(format!("{}text", template), prompt);
    }

    #[test]
    fn test_default_prompt_names_language_and_function() {
        let builder = PromptBuilder::new(ExtractionLanguage::Czech, "extract_it");
        assert!(builder.system_prompt().contains("Czech"));
        assert!(builder.system_prompt().contains("extract_it"));
    }

    #[test]
    fn test_prompt_file_override() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "Custom prompt").unwrap();
        let config = ExtractionConfig {
            system_prompt_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let builder = PromptBuilder::from_config(&config).unwrap();
        assert_eq!(builder.system_prompt(), "Custom prompt");
    }
}
