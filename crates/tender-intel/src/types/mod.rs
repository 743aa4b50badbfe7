//! Core types for the tender pipeline

pub mod document;
pub mod semantic;
pub mod tender;

pub use document::{DocumentDescriptor, DocumentKind, DocumentRecord, FileKind};
pub use semantic::{ExtractionLanguage, SemanticTenderDetail};
pub use tender::{ProcessingStage, TenderRecord, VectorDocument};
