//! Stage driver: documents, semantic extraction, indexing
//!
//! A stage that fails records a `[stage]`-tagged error on the tender and
//! leaves its processing stage where it was; later stages still run.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::{PipelineConfig, StageConfig};
use crate::error::Result;
use crate::extraction::{counter_from_path, DocumentSelector, ExtractionOrchestrator};
use crate::ingestion::{DocumentIngestor, FormatParsers, LibreOfficeConverter, DOCUMENTS_STAGE};
use crate::providers::generator_from_config;
use crate::types::{DocumentRecord, ProcessingStage, TenderRecord, VectorDocument};

pub const SEMANTIC_STAGE: &str = "semantic";
pub const INDEXING_STAGE: &str = "indexing";

/// Downstream consumer of processed tenders
#[async_trait]
pub trait TenderIndexer: Send + Sync {
    async fn index(&self, document: &VectorDocument) -> Result<()>;

    /// Indexer name for logging
    fn name(&self) -> &str;
}

/// Runs tenders through ingestion, extraction and indexing
pub struct TenderPipeline {
    ingestor: DocumentIngestor,
    orchestrator: ExtractionOrchestrator,
    selector: Option<DocumentSelector>,
    indexer: Option<Arc<dyn TenderIndexer>>,
    stages: StageConfig,
}

impl TenderPipeline {
    pub fn new(
        ingestor: DocumentIngestor,
        orchestrator: ExtractionOrchestrator,
        stages: StageConfig,
    ) -> Self {
        Self {
            ingestor,
            orchestrator,
            selector: None,
            indexer: None,
            stages,
        }
    }

    /// Build the pipeline with HTTP fetching, LibreOffice conversion and the
    /// configured generation service
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let converter = LibreOfficeConverter::new(&config.converter);
        if config.converter.enabled && !converter.is_available() {
            tracing::warn!(
                "Converter '{}' not found; legacy .doc files will fail to parse",
                config.converter.binary
            );
        }
        let parsers = Arc::new(FormatParsers::new(Arc::new(converter), &config.ingestion));
        let ingestor = DocumentIngestor::with_locator_fetcher(&config.ingestion, parsers)?;

        let generator = generator_from_config(&config.llm)?;
        let counter = counter_from_path(config.extraction.tokenizer_path.as_deref())?;
        tracing::info!("Counting tokens with {}", counter.name());

        let orchestrator =
            ExtractionOrchestrator::for_semantic_detail(generator.clone(), counter, &config.extraction)?;

        let mut pipeline = Self::new(ingestor, orchestrator, config.stages.clone());
        if config.extraction.select_documents {
            pipeline = pipeline.with_selector(DocumentSelector::new(generator));
        }
        Ok(pipeline)
    }

    pub fn with_selector(mut self, selector: DocumentSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn TenderIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn stages(&self) -> &StageConfig {
        &self.stages
    }

    /// Run every enabled stage on one tender
    pub async fn process(&self, mut tender: TenderRecord) -> TenderRecord {
        let errors_before = tender.processing_errors.len();
        tracing::info!("Processing tender {} ({})", tender.tender_id, tender.stage());

        if !self.stages.skip_documents {
            self.run_documents(&mut tender).await;
        }
        if !self.stages.skip_semantic {
            self.run_semantic(&mut tender).await;
        }
        if !self.stages.skip_indexing {
            self.run_indexing(&mut tender).await;
        }

        let new_errors = tender.processing_errors.len() - errors_before;
        if new_errors == 0 {
            advance(&mut tender, ProcessingStage::Completed, None);
        } else {
            tracing::warn!(
                "Tender {} finished with {} errors at stage {}",
                tender.tender_id,
                new_errors,
                tender.stage()
            );
        }
        tender.processed_at = Some(chrono::Utc::now());
        tender
    }

    /// Process independent tenders concurrently, keeping input order
    pub async fn process_batch(&self, tenders: Vec<TenderRecord>) -> Vec<TenderRecord> {
        let semaphore = Arc::new(Semaphore::new(self.stages.batch_concurrency.max(1)));
        let total = tenders.len();

        let futures: Vec<_> = tenders
            .into_iter()
            .map(|tender| {
                let sem = semaphore.clone();
                async move {
                    // the semaphore is never closed
                    let _permit = sem.acquire().await.ok();
                    self.process(tender).await
                }
            })
            .collect();

        let processed = join_all(futures).await;
        let completed = processed
            .iter()
            .filter(|t| t.stage() == ProcessingStage::Completed)
            .count();
        tracing::info!("Batch finished: {}/{} tenders completed", completed, total);
        processed
    }

    async fn run_documents(&self, tender: &mut TenderRecord) {
        if !tender.has_documents() {
            tracing::debug!("Tender {} has no documents", tender.tender_id);
            return;
        }
        if tender.is_documents_parsed() {
            tracing::info!(
                "Tender {} already has {} parsed documents, skipping ingestion",
                tender.tender_id,
                tender.parsed_documents.len()
            );
            return;
        }

        let failures = self.ingestor.ingest_into(tender).await;
        tracing::info!(
            "Tender {}: {} documents parsed, {} failed",
            tender.tender_id,
            tender.parsed_documents.len(),
            failures
        );
        advance(tender, ProcessingStage::DocumentsParsed, Some(DOCUMENTS_STAGE));
    }

    async fn run_semantic(&self, tender: &mut TenderRecord) {
        let metadata = tender.prepare_metadata_for_llm();

        let documents = match &self.selector {
            Some(selector) if !tender.parsed_documents.is_empty() => {
                match selector.select(&tender.parsed_documents).await {
                    Ok(selected) => selected,
                    Err(e) => {
                        tracing::warn!("Document selection failed for {}: {}", tender.tender_id, e);
                        tender.parsed_documents.iter().collect()
                    }
                }
            }
            _ => tender.parsed_documents.iter().collect::<Vec<&DocumentRecord>>(),
        };

        let result = match self.orchestrator.extract(&documents, &metadata).await {
            Ok(outcome) => {
                let calls = outcome.calls;
                outcome
                    .aggregate
                    .materialize(&self.orchestrator.compiled().shape)
                    .map(|detail| (detail, calls))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((detail, calls)) => {
                if calls == 0 {
                    tender.add_processing_warning(
                        "No document text available for extraction",
                        Some(SEMANTIC_STAGE),
                    );
                }
                tender.semantic_data = Some(detail);
                advance(tender, ProcessingStage::SemanticProcessed, Some(SEMANTIC_STAGE));
            }
            Err(e) => {
                tracing::error!("Semantic extraction failed for {}: {}", tender.tender_id, e);
                tender.add_processing_error(
                    format!("Semantic extraction error: {}", e),
                    Some(SEMANTIC_STAGE),
                );
            }
        }
    }

    async fn run_indexing(&self, tender: &mut TenderRecord) {
        let Some(indexer) = &self.indexer else {
            return;
        };
        if tender.semantic_data.is_none() {
            tracing::debug!("Tender {} has no semantic data to index", tender.tender_id);
            return;
        }

        let document = tender.vector_document();
        match indexer.index(&document).await {
            Ok(()) => {
                tracing::info!("Indexed tender {} into {}", tender.tender_id, indexer.name());
                advance(tender, ProcessingStage::VectorIndexed, Some(INDEXING_STAGE));
            }
            Err(e) => {
                tracing::error!("Indexing failed for {}: {}", tender.tender_id, e);
                tender.add_processing_error(format!("Indexing error: {}", e), Some(INDEXING_STAGE));
            }
        }
    }
}

fn advance(tender: &mut TenderRecord, stage: ProcessingStage, tag: Option<&str>) {
    if let Err(e) = tender.advance_to(stage) {
        tracing::warn!("Tender {}: {}", tender.tender_id, e);
        tender.add_processing_warning(e, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, IngestionConfig};
    use crate::error::Error;
    use crate::extraction::schema::ExtractionContract;
    use crate::extraction::tokenizer::SegmentTokenCounter;
    use crate::extraction::ExtractionFragment;
    use crate::ingestion::{ConvertedFile, DocumentConverter, FetchedFile, Fetcher};
    use crate::providers::StructuredGenerator;
    use crate::types::DocumentDescriptor;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct NoConverter;

    impl DocumentConverter for NoConverter {
        fn convert(&self, _path: &Path) -> Result<ConvertedFile> {
            Err(Error::conversion("not available"))
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    struct DirFetcher {
        dir: TempDir,
    }

    #[async_trait]
    impl Fetcher for DirFetcher {
        async fn fetch(&self, _name: &str, locator: &str) -> Result<FetchedFile> {
            let path = self.dir.path().join(locator);
            if !path.is_file() {
                return Err(Error::fetch(locator, "not found"));
            }
            Ok(FetchedFile::local(path))
        }
    }

    /// Always answers with the same fragment, or always fails
    struct FixedGenerator {
        reply: Option<serde_json::Value>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl StructuredGenerator for FixedGenerator {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _contract: &ExtractionContract,
        ) -> Result<ExtractionFragment> {
            *self.calls.lock().unwrap() += 1;
            match &self.reply {
                Some(value) => ExtractionFragment::from_value(value.clone()),
                None => Err(Error::llm("service unavailable")),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "test"
        }
    }

    #[derive(Default)]
    struct RecordingIndexer {
        indexed: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    #[async_trait]
    impl TenderIndexer for RecordingIndexer {
        async fn index(&self, document: &VectorDocument) -> Result<()> {
            if self.fail {
                return Err(Error::internal("index unavailable"));
            }
            self.indexed.lock().unwrap().push(document.id);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn pipeline(dir: TempDir, reply: Option<serde_json::Value>) -> TenderPipeline {
        let parsers = FormatParsers::new(Arc::new(NoConverter), &IngestionConfig::default());
        let ingestor = DocumentIngestor::new(Arc::new(DirFetcher { dir }), Arc::new(parsers));
        let generator = Arc::new(FixedGenerator {
            reply,
            calls: Mutex::new(0),
        });
        let orchestrator = ExtractionOrchestrator::for_semantic_detail(
            generator,
            Arc::new(SegmentTokenCounter),
            &ExtractionConfig::default(),
        )
        .unwrap();
        TenderPipeline::new(ingestor, orchestrator, StageConfig::default())
    }

    fn tender_with_documents(id: &str) -> TenderRecord {
        let mut tender = TenderRecord::new(format!("NEN_{}", id), "NEN", id);
        tender.title = Some("Dodávka serverů".to_string());
        tender.document_infos = vec![
            DocumentDescriptor::new("1", "zadani.txt", "zadani.txt"),
            DocumentDescriptor::new("2", "chybi.pdf", "chybi.pdf"),
        ];
        tender
    }

    fn fixture_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zadani.txt"), "Dodávka 20 serverů včetně instalace.").unwrap();
        dir
    }

    fn reply() -> serde_json::Value {
        json!({
            "semantic_tags": ["servery", "hardware"],
            "extraction_confidence_score": 0.7
        })
    }

    #[tokio::test]
    async fn test_full_run_records_document_errors() {
        let indexer = Arc::new(RecordingIndexer::default());
        let pipeline = pipeline(fixture_dir(), Some(reply())).with_indexer(indexer.clone());

        let tender = pipeline.process(tender_with_documents("1")).await;

        assert_eq!(tender.parsed_documents.len(), 2);
        assert_eq!(tender.processing_errors.len(), 1);
        assert!(tender.processing_errors[0].starts_with("[documents] Document parsing error for 2"));
        // the failed document keeps the run from completing
        assert_eq!(tender.stage(), ProcessingStage::VectorIndexed);

        let detail = tender.semantic_data.as_ref().unwrap();
        assert_eq!(detail.semantic_tags, vec!["servery", "hardware"]);
        assert_eq!(detail.extraction_confidence_score, Some(0.7));
        assert_eq!(indexer.indexed.lock().unwrap().as_slice(), &[tender.id()]);
        assert!(tender.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_clean_run_completes() {
        let pipeline = pipeline(fixture_dir(), Some(reply()));
        let mut tender = tender_with_documents("2");
        tender.document_infos.truncate(1);

        let tender = pipeline.process(tender).await;
        assert!(tender.processing_errors.is_empty());
        assert_eq!(tender.stage(), ProcessingStage::Completed);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_stage() {
        let pipeline = pipeline(fixture_dir(), None);
        let mut tender = tender_with_documents("3");
        tender.document_infos.truncate(1);

        let tender = pipeline.process(tender).await;
        assert_eq!(tender.stage(), ProcessingStage::DocumentsParsed);
        assert!(tender.semantic_data.is_none());
        assert_eq!(tender.processing_errors.len(), 1);
        assert!(tender.processing_errors[0].starts_with("[semantic] Semantic extraction error"));
    }

    #[tokio::test]
    async fn test_indexing_failure_is_tagged() {
        let indexer = Arc::new(RecordingIndexer {
            fail: true,
            ..Default::default()
        });
        let pipeline = pipeline(fixture_dir(), Some(reply())).with_indexer(indexer);
        let mut tender = tender_with_documents("4");
        tender.document_infos.truncate(1);

        let tender = pipeline.process(tender).await;
        assert_eq!(tender.stage(), ProcessingStage::SemanticProcessed);
        assert!(tender.processing_errors[0].starts_with("[indexing] Indexing error"));
    }

    #[tokio::test]
    async fn test_tender_without_documents_still_extracts() {
        let pipeline = pipeline(fixture_dir(), Some(reply()));
        let tender = pipeline.process(TenderRecord::new("NEN_5", "NEN", "5")).await;

        assert_eq!(tender.stage(), ProcessingStage::Completed);
        assert!(tender.semantic_data.is_some());
        assert_eq!(tender.processing_warnings.len(), 1);
        assert!(tender.processing_warnings[0].starts_with("[semantic] "));
    }

    #[tokio::test]
    async fn test_skipped_stages_do_nothing() {
        let mut pipeline = pipeline(fixture_dir(), Some(reply()));
        pipeline.stages.skip_documents = true;
        pipeline.stages.skip_semantic = true;

        let tender = pipeline.process(tender_with_documents("6")).await;
        assert!(tender.parsed_documents.is_empty());
        assert!(tender.semantic_data.is_none());
        assert_eq!(tender.stage(), ProcessingStage::Completed);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let mut pipeline = pipeline(fixture_dir(), Some(reply()));
        pipeline.stages.batch_concurrency = 2;

        let tenders: Vec<TenderRecord> = (0..5)
            .map(|i| TenderRecord::new(format!("NEN_{}", i), "NEN", i.to_string()))
            .collect();
        let processed = pipeline.process_batch(tenders).await;

        let ids: Vec<&str> = processed.iter().map(|t| t.tender_id.as_str()).collect();
        assert_eq!(ids, vec!["NEN_0", "NEN_1", "NEN_2", "NEN_3", "NEN_4"]);
        assert!(processed.iter().all(|t| t.stage() == ProcessingStage::Completed));
    }

    #[test]
    fn test_from_config_builds_without_network() {
        let config = PipelineConfig::default();
        let pipeline = tokio_test::assert_ok!(TenderPipeline::from_config(&config));
        assert!(pipeline.selector.is_none());
        assert_eq!(pipeline.stages().batch_concurrency, config.stages.batch_concurrency);
    }
}
