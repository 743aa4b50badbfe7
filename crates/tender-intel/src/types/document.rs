//! Document descriptors, file classification and parsed document records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Semantic file kinds recognized by the classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    WordModern,
    /// Old Microsoft Word document (.doc), converted before parsing
    WordLegacy,
    /// Excel spreadsheet (.xls, .xlsx)
    Spreadsheet,
    /// CSV file
    Csv,
    /// ZIP archive
    Archive,
    /// HTML document
    Html,
    /// Plain text file
    PlainText,
    /// Anything else
    Unsupported,
}

impl FileKind {
    /// Detect file kind from an extension, with or without the leading dot
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::WordModern,
            "doc" => Self::WordLegacy,
            "xls" | "xlsx" => Self::Spreadsheet,
            "csv" => Self::Csv,
            "zip" => Self::Archive,
            "html" | "htm" => Self::Html,
            "txt" | "text" => Self::PlainText,
            _ => Self::Unsupported,
        }
    }

    /// Detect file kind from a file name
    pub fn from_name(name: &str) -> Self {
        Self::from_extension(&extension_of(name))
    }

    /// Check if this is a supported file kind
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::WordModern => "Word Document (.docx)",
            Self::WordLegacy => "Word Document (.doc)",
            Self::Spreadsheet => "Excel Spreadsheet",
            Self::Csv => "CSV",
            Self::Archive => "ZIP Archive",
            Self::Html => "HTML",
            Self::PlainText => "Text File",
            Self::Unsupported => "Unsupported",
        }
    }
}

/// Lowercase extension of a file name without the dot, empty if there is none
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Kind recorded on a [`DocumentRecord`]
///
/// Mirrors [`FileKind`] and adds the explicit `error` marker used when a
/// document could not be fetched or parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    WordModern,
    WordLegacy,
    Spreadsheet,
    Csv,
    Archive,
    Html,
    PlainText,
    Unsupported,
    Error,
}

impl From<FileKind> for DocumentKind {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Pdf => Self::Pdf,
            FileKind::WordModern => Self::WordModern,
            FileKind::WordLegacy => Self::WordLegacy,
            FileKind::Spreadsheet => Self::Spreadsheet,
            FileKind::Csv => Self::Csv,
            FileKind::Archive => Self::Archive,
            FileKind::Html => Self::Html,
            FileKind::PlainText => Self::PlainText,
            FileKind::Unsupported => Self::Unsupported,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::WordModern => "word_modern",
            Self::WordLegacy => "word_legacy",
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Archive => "archive",
            Self::Html => "html",
            Self::PlainText => "plain_text",
            Self::Unsupported => "unsupported",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A document to ingest, as supplied by the upstream mapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentDescriptor {
    pub id: String,
    #[serde(alias = "file")]
    pub name: String,
    /// URL or local path
    #[serde(alias = "download_link", alias = "url")]
    pub locator: String,
}

impl DocumentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// Parsed document with its extracted text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    /// Stable id, unique within a tender
    pub id: String,
    /// Original file name (archive entry name for archive members)
    pub name: String,
    pub kind: DocumentKind,
    /// Lowercase extension without the dot
    #[serde(default)]
    pub extension: String,
    /// Local path or opaque handle the content was read from
    #[serde(default)]
    pub locator: String,
    /// Download URL, absent for archive members
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub full_text: String,
    /// SHA-256 of `full_text`, set for successfully parsed content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl DocumentRecord {
    /// Record for a descriptor that failed before or during parsing
    pub fn error(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: Option<String>,
        message: impl fmt::Display,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            extension: extension_of(&name),
            name,
            kind: DocumentKind::Error,
            locator: String::new(),
            source_url,
            preview: format!("Error processing file: {}", message),
            full_text: String::new(),
            content_hash: None,
        }
    }

    /// Marker record for a file kind the parsers do not handle
    pub fn unsupported(
        id: impl Into<String>,
        name: impl Into<String>,
        locator: impl Into<String>,
        source_url: Option<String>,
    ) -> Self {
        let name = name.into();
        let extension = extension_of(&name);
        Self {
            id: id.into(),
            preview: format!("Unsupported file type: .{}", extension),
            full_text: format!("File {} has unsupported format: .{}", name, extension),
            name,
            kind: DocumentKind::Unsupported,
            extension,
            locator: locator.into(),
            source_url,
            content_hash: None,
        }
    }

    /// Whether this record carries usable text
    pub fn has_text(&self) -> bool {
        !self.full_text.trim().is_empty()
            && !matches!(self.kind, DocumentKind::Error | DocumentKind::Unsupported)
    }

    pub fn is_error(&self) -> bool {
        self.kind == DocumentKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(FileKind::from_name("Zadani.PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_name("smlouva.Docx"), FileKind::WordModern);
        assert_eq!(FileKind::from_name("old.DOC"), FileKind::WordLegacy);
        assert_eq!(FileKind::from_name("ceny.xlsx"), FileKind::Spreadsheet);
        assert_eq!(FileKind::from_name("ceny.xls"), FileKind::Spreadsheet);
        assert_eq!(FileKind::from_name("data.csv"), FileKind::Csv);
        assert_eq!(FileKind::from_name("bundle.ZIP"), FileKind::Archive);
        assert_eq!(FileKind::from_name("page.htm"), FileKind::Html);
        assert_eq!(FileKind::from_name("notes.txt"), FileKind::PlainText);
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        assert_eq!(FileKind::from_name("drawing.dwg"), FileKind::Unsupported);
        assert_eq!(FileKind::from_name("no_extension"), FileKind::Unsupported);
        assert_eq!(FileKind::from_extension(".PdF"), FileKind::Pdf);
        assert!(!FileKind::Unsupported.is_supported());
    }

    #[test]
    fn test_descriptor_accepts_scraper_keys() {
        let json = r#"{"id": "42", "file": "a.pdf", "download_link": "https://x/a.pdf"}"#;
        let descriptor: DocumentDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.name, "a.pdf");
        assert_eq!(descriptor.locator, "https://x/a.pdf");
    }

    #[test]
    fn test_marker_records() {
        let unsupported = DocumentRecord::unsupported("7", "plan.dwg", "/tmp/plan.dwg", None);
        assert_eq!(unsupported.kind, DocumentKind::Unsupported);
        assert_eq!(unsupported.preview, "Unsupported file type: .dwg");
        assert!(!unsupported.has_text());

        let error = DocumentRecord::error("8", "a.pdf", None, "boom");
        assert!(error.is_error());
        assert_eq!(error.preview, "Error processing file: boom");
        assert!(error.full_text.is_empty());
    }
}
