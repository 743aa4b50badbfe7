//! Token-budget chunking of document text
//!
//! The budget is what remains of the context window after the system prompt,
//! the populated user prompt template and the reserved response tokens.

use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};

use super::tokenizer::TokenCounter;

/// Separator used when paragraphs are rejoined into a chunk
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Granularity used to break up a paragraph larger than the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitLevel {
    Sentence,
    Word,
    Grapheme,
}

impl SplitLevel {
    fn finer(self) -> Option<Self> {
        match self {
            Self::Sentence => Some(Self::Word),
            Self::Word => Some(Self::Grapheme),
            Self::Grapheme => None,
        }
    }
}

/// Splits document text into chunks that fit the remaining context window
pub struct TokenBudgetChunker {
    counter: Arc<dyn TokenCounter>,
    context_window: usize,
    response_tokens: usize,
}

impl TokenBudgetChunker {
    pub fn new(counter: Arc<dyn TokenCounter>, context_window: usize, response_tokens: usize) -> Self {
        Self {
            counter,
            context_window,
            response_tokens,
        }
    }

    pub fn from_config(counter: Arc<dyn TokenCounter>, config: &ExtractionConfig) -> Self {
        Self::new(counter, config.context_window, config.response_tokens)
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Tokens available for document text
    pub fn budget(&self, system_prompt: &str, template: &str) -> Result<usize> {
        let system_tokens = self.counter.count(system_prompt);
        let template_tokens = self.counter.count(template);
        let used = system_tokens
            .saturating_add(template_tokens)
            .saturating_add(self.response_tokens);

        if used >= self.context_window {
            return Err(Error::Capacity {
                context_window: self.context_window,
                system_tokens,
                template_tokens,
                response_tokens: self.response_tokens,
            });
        }

        let budget = self.context_window - used;
        tracing::debug!(
            "Chunk budget {} (system {}, template {}, response {})",
            budget,
            system_tokens,
            template_tokens,
            self.response_tokens
        );
        Ok(budget)
    }

    /// Compute the budget, then split `text` against it
    pub fn chunk(&self, system_prompt: &str, template: &str, text: &str) -> Result<Vec<String>> {
        let budget = self.budget(system_prompt, template)?;
        Ok(self.pack(text, budget))
    }

    /// Greedily pack paragraphs into chunks of at most `budget` tokens
    ///
    /// Always returns at least one chunk; empty text gives a single empty chunk.
    pub fn pack(&self, text: &str, budget: usize) -> Vec<String> {
        let paragraphs = split_paragraphs(text);
        if paragraphs.is_empty() {
            return vec![String::new()];
        }

        let separator_tokens = self.counter.count(PARAGRAPH_SEPARATOR);
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for paragraph in paragraphs {
            let tokens = self.counter.count(paragraph);

            if tokens > budget {
                flush_paragraphs(&mut current, &mut chunks);
                current_tokens = 0;
                chunks.extend(self.split_oversized(paragraph, budget, SplitLevel::Sentence));
                continue;
            }

            let with_paragraph = if current.is_empty() {
                tokens
            } else {
                current_tokens + separator_tokens + tokens
            };

            if with_paragraph > budget {
                flush_paragraphs(&mut current, &mut chunks);
                current_tokens = tokens;
            } else {
                current_tokens = with_paragraph;
            }
            current.push(paragraph);
        }
        flush_paragraphs(&mut current, &mut chunks);

        tracing::debug!("Packed text into {} chunks (budget {})", chunks.len(), budget);
        chunks
    }

    fn split_oversized(&self, text: &str, budget: usize, level: SplitLevel) -> Vec<String> {
        let pieces: Vec<&str> = match level {
            SplitLevel::Sentence => text.split_sentence_bounds().collect(),
            SplitLevel::Word => text.split_word_bounds().collect(),
            SplitLevel::Grapheme => text.graphemes(true).collect(),
        };

        let mut out = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for piece in pieces {
            let tokens = self.counter.count(piece);

            if tokens > budget {
                flush_text(&mut current, &mut out);
                current_tokens = 0;
                match level.finer() {
                    Some(finer) => out.extend(self.split_oversized(piece, budget, finer)),
                    // a single grapheme over budget cannot be split further
                    None => out.push(piece.to_string()),
                }
                continue;
            }

            if current_tokens + tokens > budget {
                flush_text(&mut current, &mut out);
                current_tokens = 0;
            }
            current.push_str(piece);
            current_tokens += tokens;
        }
        flush_text(&mut current, &mut out);
        out
    }
}

/// Split on blank lines, trimming each paragraph and dropping empty ones
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push(text[s..end].trim());
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        paragraphs.push(text[s..end].trim());
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

fn flush_paragraphs(current: &mut Vec<&str>, chunks: &mut Vec<String>) {
    if !current.is_empty() {
        chunks.push(current.join(PARAGRAPH_SEPARATOR));
        current.clear();
    }
}

fn flush_text(current: &mut String, out: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}
