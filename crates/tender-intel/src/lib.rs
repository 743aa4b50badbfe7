//! tender-intel: procurement tender document ingestion and semantic extraction
//!
//! Tender documents are fetched, parsed into plain text (PDF, Word, spreadsheets,
//! CSV, HTML, text and ZIP archives) and then read chunk by chunk by a
//! generation service that fills a typed semantic record. Each chunk's partial
//! result is merged into the record built so far, so later chunks enrich rather
//! than overwrite earlier findings.

pub mod config;
pub mod error;
pub mod extraction;
pub mod ingestion;
pub mod pipeline;
pub mod providers;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{TenderIndexer, TenderPipeline};
pub use types::{
    document::{DocumentDescriptor, DocumentKind, DocumentRecord, FileKind},
    semantic::SemanticTenderDetail,
    tender::{ProcessingStage, TenderRecord, VectorDocument},
};
