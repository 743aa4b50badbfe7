//! Document ingestion: fetch, classify, parse and expand archives

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::document::extension_of;
use crate::types::{DocumentDescriptor, DocumentKind, DocumentRecord, FileKind, TenderRecord};

use super::archive::ArchiveExpander;
use super::fetch::{Fetcher, LocatorFetcher};
use super::parser::FormatParsers;

/// Stage tag for messages recorded by the ingestor
pub const DOCUMENTS_STAGE: &str = "documents";

/// Result of ingesting a descriptor list
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Records in descriptor order, archive members after their wrapper
    pub records: Vec<DocumentRecord>,
    /// One message per descriptor that ended as an error record
    pub errors: Vec<String>,
}

/// Turns document descriptors into parsed document records
pub struct DocumentIngestor {
    fetcher: Arc<dyn Fetcher>,
    parsers: Arc<FormatParsers>,
    archives: Arc<ArchiveExpander>,
}

impl DocumentIngestor {
    pub fn new(fetcher: Arc<dyn Fetcher>, parsers: Arc<FormatParsers>) -> Self {
        Self {
            fetcher,
            archives: Arc::new(ArchiveExpander::new(parsers.clone())),
            parsers,
        }
    }

    /// Ingestor fetching URLs and local paths with [`LocatorFetcher`]
    pub fn with_locator_fetcher(
        config: &crate::config::IngestionConfig,
        parsers: Arc<FormatParsers>,
    ) -> Result<Self> {
        Ok(Self::new(Arc::new(LocatorFetcher::new(config)?), parsers))
    }

    /// Ingest every descriptor, in order
    ///
    /// Every descriptor yields at least one record; failures become
    /// `error`-kind records and a message in [`IngestReport::errors`].
    pub async fn ingest(&self, descriptors: &[DocumentDescriptor]) -> IngestReport {
        let mut report = IngestReport::default();

        for descriptor in descriptors {
            match self.ingest_one(descriptor).await {
                Ok(records) => {
                    tracing::info!(
                        "Ingested {} ({}) into {} records",
                        descriptor.name,
                        descriptor.id,
                        records.len()
                    );
                    report.records.extend(records);
                }
                Err(e) => {
                    tracing::error!("Failed to ingest {} ({}): {}", descriptor.name, descriptor.id, e);
                    report
                        .errors
                        .push(format!("Document parsing error for {}: {}", descriptor.id, e));
                    report.records.push(DocumentRecord::error(
                        descriptor.id.as_str(),
                        descriptor.name.as_str(),
                        source_url(descriptor),
                        &e,
                    ));
                }
            }
        }

        log_duplicates(&report.records);
        report
    }

    /// Ingest the tender's descriptors and record the results on it
    ///
    /// Returns the number of descriptors that failed.
    pub async fn ingest_into(&self, tender: &mut TenderRecord) -> usize {
        let report = self.ingest(&tender.document_infos).await;
        for error in &report.errors {
            tender.add_processing_error(error, Some(DOCUMENTS_STAGE));
        }
        for record in report.records {
            tender.add_parsed_document(record);
        }
        report.errors.len()
    }

    async fn ingest_one(&self, descriptor: &DocumentDescriptor) -> Result<Vec<DocumentRecord>> {
        if descriptor.id.trim().is_empty()
            || descriptor.name.trim().is_empty()
            || descriptor.locator.trim().is_empty()
        {
            return Err(Error::fetch(
                descriptor.locator.as_str(),
                "descriptor is missing its id, name or locator",
            ));
        }

        // kept alive until parsing is done; a downloaded copy is deleted on drop
        let fetched = self.fetcher.fetch(&descriptor.name, &descriptor.locator).await?;
        let path = fetched.path().to_path_buf();
        let kind = FileKind::from_name(&descriptor.name);
        tracing::debug!("Classified {} as {}", descriptor.name, kind.display_name());

        let records = match kind {
            FileKind::Unsupported => vec![DocumentRecord::unsupported(
                descriptor.id.as_str(),
                descriptor.name.as_str(),
                descriptor.locator.as_str(),
                source_url(descriptor),
            )],
            FileKind::Archive => self.expand_archive(descriptor, path).await?,
            kind => vec![self.parse_document(descriptor, path, kind).await?],
        };

        drop(fetched);
        Ok(records)
    }

    async fn parse_document(
        &self,
        descriptor: &DocumentDescriptor,
        path: PathBuf,
        kind: FileKind,
    ) -> Result<DocumentRecord> {
        let parsers = self.parsers.clone();
        let content = tokio::task::spawn_blocking(move || parsers.try_parse(&path, kind))
            .await
            .map_err(|e| Error::internal(format!("Parser task failed: {}", e)))??;

        Ok(DocumentRecord {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            kind: DocumentKind::from(kind),
            extension: extension_of(&descriptor.name),
            locator: descriptor.locator.clone(),
            source_url: source_url(descriptor),
            content_hash: content.content_hash(),
            preview: content.preview,
            full_text: content.full_text,
        })
    }

    async fn expand_archive(
        &self,
        descriptor: &DocumentDescriptor,
        path: PathBuf,
    ) -> Result<Vec<DocumentRecord>> {
        let archives = self.archives.clone();
        let parent_id = descriptor.id.clone();
        let members = tokio::task::spawn_blocking(move || archives.expand(&path, &parent_id))
            .await
            .map_err(|e| Error::internal(format!("Archive task failed: {}", e)))?;

        let wrapper = DocumentRecord {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            kind: DocumentKind::Archive,
            extension: extension_of(&descriptor.name),
            locator: descriptor.locator.clone(),
            source_url: source_url(descriptor),
            preview: format!("ZIP archive containing {} files", members.len()),
            full_text: format!(
                "ZIP archive: {} - Contains {} extractable files",
                descriptor.name,
                members.len()
            ),
            content_hash: None,
        };

        let mut records = Vec::with_capacity(members.len() + 1);
        records.push(wrapper);
        records.extend(members);
        Ok(records)
    }
}

fn source_url(descriptor: &DocumentDescriptor) -> Option<String> {
    LocatorFetcher::is_url(&descriptor.locator).then(|| descriptor.locator.clone())
}

/// Identical content under different ids is kept but worth knowing about
fn log_duplicates(records: &[DocumentRecord]) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for record in records {
        let Some(hash) = record.content_hash.as_deref() else {
            continue;
        };
        if let Some(first) = seen.insert(hash, &record.id) {
            tracing::info!("Document {} has the same content as {}", record.id, first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestionConfig;
    use crate::ingestion::converter::{ConvertedFile, DocumentConverter};
    use crate::ingestion::fetch::FetchedFile;
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoConverter;

    impl DocumentConverter for NoConverter {
        fn convert(&self, _path: &Path) -> Result<ConvertedFile> {
            Err(Error::conversion("not available"))
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    /// Serves files from a directory; locators are file names in it
    struct DirFetcher {
        dir: TempDir,
    }

    #[async_trait]
    impl Fetcher for DirFetcher {
        async fn fetch(&self, _name: &str, locator: &str) -> Result<FetchedFile> {
            let name = locator.rsplit('/').next().unwrap_or(locator);
            let path = self.dir.path().join(name);
            if !path.is_file() {
                return Err(Error::fetch(locator, "HTTP 404 Not Found"));
            }
            Ok(FetchedFile::local(path))
        }
    }

    fn ingestor(dir: TempDir) -> DocumentIngestor {
        let parsers = FormatParsers::new(Arc::new(NoConverter), &IngestionConfig::default());
        DocumentIngestor::new(Arc::new(DirFetcher { dir }), Arc::new(parsers))
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, text) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(text.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_every_descriptor_yields_a_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zadani.txt"), "Předmět zakázky").unwrap();
        std::fs::write(dir.path().join("plan.dwg"), "\u{0}").unwrap();
        std::fs::write(dir.path().join("empty.csv"), "a,b\n").unwrap();

        let descriptors = vec![
            DocumentDescriptor::new("1", "zadani.txt", "https://nen.example/zadani.txt"),
            DocumentDescriptor::new("2", "plan.dwg", "https://nen.example/plan.dwg"),
            DocumentDescriptor::new("3", "missing.pdf", "https://nen.example/missing.pdf"),
            DocumentDescriptor::new("4", "empty.csv", "https://nen.example/empty.csv"),
            DocumentDescriptor::new("5", "", "https://nen.example/x.pdf"),
        ];

        let report = ingestor(dir).ingest(&descriptors).await;
        assert_eq!(report.records.len(), descriptors.len());

        let kinds: Vec<DocumentKind> = report.records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DocumentKind::PlainText,
                DocumentKind::Unsupported,
                DocumentKind::Error,
                DocumentKind::Error,
                DocumentKind::Error,
            ]
        );
        assert_eq!(report.records[0].full_text, "Předmět zakázky");
        assert_eq!(
            report.records[0].source_url.as_deref(),
            Some("https://nen.example/zadani.txt")
        );
        assert!(report.records[2].preview.starts_with("Error processing file: "));
        assert!(report.records[3].preview.contains("Empty file"));
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].starts_with("Document parsing error for 3: "));
    }

    #[tokio::test]
    async fn test_archive_yields_wrapper_and_members() {
        let dir = tempfile::tempdir().unwrap();
        write_zip(
            &dir.path().join("bundle.zip"),
            &[("Zadání.txt", "Text zadání"), ("výkres.dwg", "binary")],
        );

        let descriptors = vec![DocumentDescriptor::new("10", "bundle.zip", "bundle.zip")];
        let report = ingestor(dir).ingest(&descriptors).await;

        assert_eq!(report.records.len(), 3);
        let wrapper = &report.records[0];
        assert_eq!(wrapper.kind, DocumentKind::Archive);
        assert_eq!(wrapper.preview, "ZIP archive containing 2 files");
        assert_eq!(
            wrapper.full_text,
            "ZIP archive: bundle.zip - Contains 2 extractable files"
        );
        assert!(wrapper.source_url.is_none());

        assert_eq!(report.records[1].id, "10_zip_1_zadání");
        assert_eq!(report.records[1].full_text, "Text zadání");
        assert_eq!(report.records[2].id, "10_zip_2_výkres");
        assert_eq!(report.records[2].kind, DocumentKind::Unsupported);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_into_tags_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();

        let mut tender = TenderRecord::new("t-1", "nen", "N006/24/V00001");
        tender.document_infos = vec![
            DocumentDescriptor::new("1", "a.txt", "a.txt"),
            DocumentDescriptor::new("2", "b.pdf", "b.pdf"),
        ];

        let failures = ingestor(dir).ingest_into(&mut tender).await;
        assert_eq!(failures, 1);
        assert_eq!(tender.parsed_documents.len(), 2);
        assert_eq!(tender.processing_errors.len(), 1);
        assert!(tender.processing_errors[0].starts_with("[documents] Document parsing error for 2"));
    }

    #[tokio::test]
    async fn test_pdf_document_fits_one_chunk() {
        use crate::extraction::{SegmentTokenCounter, TokenBudgetChunker};
        use crate::ingestion::parser::fixtures::write_pdf;

        let dir = tempfile::tempdir().unwrap();
        write_pdf(
            &dir.path().join("zadani.pdf"),
            &["First block of text", "Second block here", "Third block end"],
        );

        let descriptors = vec![DocumentDescriptor::new(
            "7",
            "zadani.pdf",
            "https://nen.example/zadani.pdf",
        )];
        let report = ingestor(dir).ingest(&descriptors).await;

        assert_eq!(report.records.len(), 1);
        assert!(report.errors.is_empty());
        let record = &report.records[0];
        assert_eq!(record.kind, DocumentKind::Pdf);
        assert_eq!(record.extension, "pdf");
        assert!(record.preview.contains("First block of text"));
        assert!(record.full_text.contains("Third block end"));

        let chunker = TokenBudgetChunker::new(Arc::new(SegmentTokenCounter), 1_000, 100);
        let chunks = chunker
            .chunk("system prompt", "template", &record.full_text)
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "same").unwrap();
        std::fs::write(dir.path().join("b.txt"), "same").unwrap();

        let descriptors = vec![
            DocumentDescriptor::new("1", "a.txt", "a.txt"),
            DocumentDescriptor::new("2", "b.txt", "b.txt"),
        ];
        let report = ingestor(dir).ingest(&descriptors).await;
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].content_hash, report.records[1].content_hash);
    }
}
