//! ZIP archive expansion into member document records

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::document::extension_of;
use crate::types::{DocumentKind, DocumentRecord, FileKind};

use super::parser::FormatParsers;

/// Expands an archive by parsing each member with the format parsers
pub struct ArchiveExpander {
    parsers: Arc<FormatParsers>,
    max_entry_bytes: u64,
}

impl ArchiveExpander {
    pub fn new(parsers: Arc<FormatParsers>) -> Self {
        Self {
            max_entry_bytes: parsers.max_file_bytes(),
            parsers,
        }
    }

    pub fn with_max_entry_bytes(mut self, bytes: u64) -> Self {
        self.max_entry_bytes = bytes;
        self
    }

    /// Expand the archive at `path` into member records owned by `parent_id`
    ///
    /// Never fails: an archive that cannot be opened yields a single error
    /// record with id `{parent_id}_zip_error`.
    pub fn expand(&self, path: &Path, parent_id: &str) -> Vec<DocumentRecord> {
        match self.try_expand(path, parent_id) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Failed to unpack archive {}: {}", path.display(), e);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let mut record =
                    DocumentRecord::error(format!("{}_zip_error", parent_id), name, None, &e);
                record.preview = format!("Error unpacking ZIP: {}", e);
                vec![record]
            }
        }
    }

    fn try_expand(&self, path: &Path, parent_id: &str) -> Result<Vec<DocumentRecord>> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| Error::archive(e.to_string()))?;

        // removed with everything extracted into it once expansion returns
        let work_dir = tempfile::Builder::new().prefix("tender-zip-").tempdir()?;
        let mut records = Vec::new();
        let mut ordinal = 0usize;

        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Unreadable entry {} in {}: {}", index, path.display(), e);
                    continue;
                }
            };

            let entry_name = entry.name().to_string();
            if entry.is_dir() || is_hidden_entry(&entry_name) {
                tracing::debug!("Skipping archive entry {}", entry_name);
                continue;
            }

            ordinal += 1;
            let member_name = base_name(&entry_name);
            let id = member_id(parent_id, ordinal, &member_name);

            let target = match entry.enclosed_name() {
                Some(relative) => work_dir.path().join(relative),
                None => {
                    tracing::warn!("Archive entry {} escapes the extraction dir", entry_name);
                    records.push(DocumentRecord::error(
                        id,
                        member_name,
                        None,
                        "unsafe archive entry path",
                    ));
                    continue;
                }
            };

            if let Err(e) = extract_entry(&mut entry, &target, self.max_entry_bytes) {
                tracing::warn!("Failed to extract {}: {}", entry_name, e);
                records.push(DocumentRecord::error(id, member_name, None, e));
                continue;
            }

            let record = self.member_record(id, member_name, &target);
            tracing::debug!("Archive entry {} -> {} ({})", entry_name, record.id, record.kind);
            records.push(record);
        }

        tracing::info!(
            "Expanded {} into {} member records",
            path.display(),
            records.len()
        );
        Ok(records)
    }

    fn member_record(&self, id: String, name: String, path: &Path) -> DocumentRecord {
        let locator = path.display().to_string();
        match FileKind::from_name(&name) {
            FileKind::Unsupported => DocumentRecord::unsupported(id, name, locator, None),
            FileKind::Archive => {
                let mut record = DocumentRecord::unsupported(id, name.as_str(), locator, None);
                record.full_text = format!("Nested archive {} was not expanded", name);
                record
            }
            kind => {
                let content = self.parsers.parse(path, kind);
                if content.failed {
                    return DocumentRecord::error(id, name, None, content.preview);
                }
                DocumentRecord {
                    id,
                    extension: extension_of(&name),
                    name,
                    kind: DocumentKind::from(kind),
                    locator,
                    source_url: None,
                    content_hash: content.content_hash(),
                    preview: content.preview,
                    full_text: content.full_text,
                }
            }
        }
    }
}

/// Copy at most `max_bytes` of the entry to `target`
fn extract_entry(entry: &mut impl Read, target: &Path, max_bytes: u64) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    let written = std::io::copy(&mut entry.take(max_bytes.saturating_add(1)), &mut out)?;
    if written > max_bytes {
        drop(out);
        let _ = std::fs::remove_file(target);
        return Err(Error::archive(format!(
            "Archive member exceeds the {} byte limit",
            max_bytes
        )));
    }
    Ok(())
}

/// Directory metadata and dotfiles are not documents
fn is_hidden_entry(entry_name: &str) -> bool {
    entry_name.starts_with("__MACOSX/")
        || entry_name
            .split('/')
            .any(|component| component.starts_with('.'))
}

fn base_name(entry_name: &str) -> String {
    PathBuf::from(entry_name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| entry_name.to_string())
}

/// Id of the `ordinal`-th attempted member of an archive
pub fn member_id(parent_id: &str, ordinal: usize, member_name: &str) -> String {
    let stem = Path::new(member_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}_zip_{}_{}", parent_id, ordinal, slug(&stem))
}

/// Lowercase alphanumerics with single underscores between runs
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}
