//! Token counting for context-window budgeting

use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};

/// Counts tokens the way the generation model will see them
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Counter name for logging
    fn name(&self) -> &str;
}

/// Counter backed by a HuggingFace `tokenizer.json`
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
    fallback: SegmentTokenCounter,
}

impl HfTokenCounter {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            Error::Config(format!("Failed to load tokenizer {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded tokenizer from {}", path.display());
        Ok(Self {
            tokenizer,
            fallback: SegmentTokenCounter,
        })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!("Tokenization failed, counting word segments: {}", e);
                self.fallback.count(text)
            }
        }
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

/// Approximate counter: one token per non-whitespace word-boundary segment
///
/// Punctuation marks count as their own segment, which keeps the estimate
/// on the high side for prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentTokenCounter;

impl TokenCounter for SegmentTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_word_bounds()
            .filter(|segment| !segment.trim().is_empty())
            .count()
    }

    fn name(&self) -> &str {
        "segments"
    }
}

/// Counter from an optional tokenizer file
pub fn counter_from_path(path: Option<&Path>) -> Result<Arc<dyn TokenCounter>> {
    match path {
        Some(path) => Ok(Arc::new(HfTokenCounter::from_file(path)?)),
        None => {
            tracing::info!("No tokenizer configured, using word segment counts");
            Ok(Arc::new(SegmentTokenCounter))
        }
    }
}
