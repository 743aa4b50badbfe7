//! Sequential, chunk-by-chunk extraction over a tender's documents
//!
//! Every chunk prompt embeds the aggregate as it stands after the previous
//! chunk, so documents and chunks are processed strictly in order.

use serde_json::Value;
use std::sync::Arc;

use crate::config::{BudgetPolicy, ExtractionConfig};
use crate::error::Result;
use crate::providers::StructuredGenerator;
use crate::types::{DocumentRecord, SemanticTenderDetail};

use super::accumulate::{AccumulationEngine, Aggregate};
use super::chunker::{TokenBudgetChunker, PARAGRAPH_SEPARATOR};
use super::prompt::PromptBuilder;
use super::schema::{CompiledShape, SchemaCompiler};
use super::tokenizer::TokenCounter;

/// Description attached to the semantic extraction contract
pub const EXTRACTION_DESCRIPTION: &str = "Extract comprehensive procurement intelligence and \
semantic data optimized for multilingual vector search and company-tender matching";

/// Progress of one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Init,
    PerDocument { document: usize },
    PerChunk { document: usize, chunk: usize },
    Merged { document: usize, chunk: usize },
    Done,
}

/// Final aggregate of an extraction run
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub aggregate: Aggregate,
    /// Generation calls made
    pub calls: usize,
    /// Documents that contributed at least one chunk
    pub documents: usize,
}

/// Drives chunking, generation and merging for one tender at a time
pub struct ExtractionOrchestrator {
    generator: Arc<dyn StructuredGenerator>,
    chunker: TokenBudgetChunker,
    prompts: PromptBuilder,
    compiled: CompiledShape,
    engine: AccumulationEngine,
    policy: BudgetPolicy,
    skip_empty_documents: bool,
}

impl ExtractionOrchestrator {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        counter: Arc<dyn TokenCounter>,
        prompts: PromptBuilder,
        compiled: CompiledShape,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            generator,
            chunker: TokenBudgetChunker::from_config(counter, config),
            prompts,
            engine: AccumulationEngine::new(compiled.shape.clone()),
            compiled,
            policy: config.budget_policy,
            skip_empty_documents: config.skip_empty_documents,
        }
    }

    /// Orchestrator producing [`SemanticTenderDetail`] records
    pub fn for_semantic_detail(
        generator: Arc<dyn StructuredGenerator>,
        counter: Arc<dyn TokenCounter>,
        config: &ExtractionConfig,
    ) -> Result<Self> {
        let shape = SemanticTenderDetail::shape(config.language);
        let compiled = SchemaCompiler::compile(&shape, &config.function_name, EXTRACTION_DESCRIPTION);
        let prompts = PromptBuilder::from_config(config)?;
        Ok(Self::new(generator, counter, prompts, compiled, config))
    }

    pub fn compiled(&self) -> &CompiledShape {
        &self.compiled
    }

    /// Extract and materialize the typed semantic record
    pub async fn extract_detail(
        &self,
        documents: &[&DocumentRecord],
        metadata: &Value,
    ) -> Result<SemanticTenderDetail> {
        let outcome = self.extract(documents, metadata).await?;
        outcome.aggregate.materialize(&self.compiled.shape)
    }

    /// Fold every chunk of every document into one aggregate
    ///
    /// Any capacity, generation or decode error aborts the run.
    pub async fn extract(
        &self,
        documents: &[&DocumentRecord],
        metadata: &Value,
    ) -> Result<ExtractionOutcome> {
        let metadata_json = serde_json::to_string_pretty(metadata)?;
        let mut aggregate = self.engine.skeleton();
        let mut calls = 0usize;
        let mut contributing = 0usize;
        enter(ExtractionState::Init);

        for (document_index, document) in documents.iter().enumerate() {
            if self.skip_empty_documents && !document.has_text() {
                tracing::debug!("Skipping document {} without text", document.id);
                continue;
            }

            enter(ExtractionState::PerDocument {
                document: document_index,
            });
            tracing::info!("Processing document: {} - {}", document.id, document.name);

            aggregate = match self.policy {
                BudgetPolicy::PerDocument => {
                    self.extract_per_document(document, document_index, &metadata_json, aggregate, &mut calls)
                        .await?
                }
                BudgetPolicy::PerChunk => {
                    self.extract_per_chunk(document, document_index, &metadata_json, aggregate, &mut calls)
                        .await?
                }
            };
            contributing += 1;
        }

        enter(ExtractionState::Done);
        tracing::info!(
            "Extraction finished after {} calls over {} documents",
            calls,
            contributing
        );
        Ok(ExtractionOutcome {
            aggregate,
            calls,
            documents: contributing,
        })
    }

    /// Budget once against the aggregate as it was before the document
    async fn extract_per_document(
        &self,
        document: &DocumentRecord,
        document_index: usize,
        metadata_json: &str,
        mut aggregate: Aggregate,
        calls: &mut usize,
    ) -> Result<Aggregate> {
        let template = self
            .prompts
            .template(metadata_json, &aggregate.to_json()?, &document.name);
        let chunks = self
            .chunker
            .chunk(self.prompts.system_prompt(), &template, &document.full_text)?;
        tracing::info!("Total chunks: {}", chunks.len());

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            aggregate = self
                .run_chunk(
                    document,
                    document_index,
                    metadata_json,
                    &aggregate,
                    chunk_index,
                    chunks.len(),
                    chunk,
                    calls,
                )
                .await?;
        }
        Ok(aggregate)
    }

    /// Re-budget before every chunk and re-pack whatever text is left
    async fn extract_per_chunk(
        &self,
        document: &DocumentRecord,
        document_index: usize,
        metadata_json: &str,
        mut aggregate: Aggregate,
        calls: &mut usize,
    ) -> Result<Aggregate> {
        let mut remaining = document.full_text.clone();
        let mut chunk_index = 0usize;

        loop {
            let template = self
                .prompts
                .template(metadata_json, &aggregate.to_json()?, &document.name);
            let budget = self.chunker.budget(self.prompts.system_prompt(), &template)?;
            let mut chunks = self.chunker.pack(&remaining, budget).into_iter();

            // pack always yields at least one chunk
            let Some(chunk) = chunks.next() else {
                break;
            };
            let rest: Vec<String> = chunks.collect();
            let total = chunk_index + 1 + rest.len();

            aggregate = self
                .run_chunk(
                    document,
                    document_index,
                    metadata_json,
                    &aggregate,
                    chunk_index,
                    total,
                    &chunk,
                    calls,
                )
                .await?;

            if rest.is_empty() {
                break;
            }
            remaining = rest.join(PARAGRAPH_SEPARATOR);
            chunk_index += 1;
        }
        Ok(aggregate)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chunk(
        &self,
        document: &DocumentRecord,
        document_index: usize,
        metadata_json: &str,
        aggregate: &Aggregate,
        chunk_index: usize,
        total: usize,
        chunk: &str,
        calls: &mut usize,
    ) -> Result<Aggregate> {
        enter(ExtractionState::PerChunk {
            document: document_index,
            chunk: chunk_index,
        });
        let user_prompt = self.prompts.user_prompt(
            metadata_json,
            &aggregate.to_json()?,
            &document.name,
            chunk_index,
            total,
            chunk,
        );

        tracing::info!(
            "LLM call #{} for document {}, chunk {}/{}",
            *calls + 1,
            document.id,
            chunk_index + 1,
            total
        );
        tracing::debug!("Chunk token count: {}", self.chunker.counter().count(chunk));

        let fragment = self
            .generator
            .complete(self.prompts.system_prompt(), &user_prompt, &self.compiled.contract)
            .await?;
        *calls += 1;

        let merged = self.engine.merge(&fragment, aggregate);
        enter(ExtractionState::Merged {
            document: document_index,
            chunk: chunk_index,
        });
        Ok(merged)
    }
}

fn enter(state: ExtractionState) {
    tracing::trace!(?state, "extraction state");
}
