//! Document ingestion with multi-format parsing and archive expansion

pub mod archive;
pub mod converter;
pub mod fetch;
mod ingestor;
pub mod parser;

pub use archive::ArchiveExpander;
pub use converter::{ConvertedFile, DocumentConverter, LibreOfficeConverter};
pub use fetch::{FetchedFile, Fetcher, LocatorFetcher};
pub use ingestor::{DocumentIngestor, IngestReport, DOCUMENTS_STAGE};
pub use parser::{hash_content, FormatParsers, ParsedContent};
