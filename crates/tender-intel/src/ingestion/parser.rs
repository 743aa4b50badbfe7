//! Per-format parsers producing a preview and the full document text
//!
//! Parsers work on a local path and never fail outward: [`FormatParsers::parse`]
//! turns every internal error into a diagnostic preview with empty text.

use calamine::Reader;
use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCell, TableCellContent,
    TableChild, TableRowChild,
};
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::types::FileKind;

use super::converter::DocumentConverter;

/// Delimiter between rendered table and grid cells
pub const CELL_DELIMITER: &str = " | ";

/// Text extracted from one file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContent {
    /// First few logical blocks, or a diagnostic message on failure
    pub preview: String,
    pub full_text: String,
    /// Number of logical blocks found
    pub block_count: usize,
    /// Set when `preview` holds a diagnostic instead of content
    pub failed: bool,
}

impl ParsedContent {
    /// Build content from logical blocks; `full_text` joins them with newlines
    pub fn from_blocks(blocks: &[String], preview_blocks: usize) -> Self {
        Self::joined(blocks, preview_blocks, "\n")
    }

    fn joined(blocks: &[String], preview_blocks: usize, separator: &str) -> Self {
        let preview_len = preview_blocks.min(blocks.len());
        Self {
            preview: blocks[..preview_len].join("\n"),
            full_text: blocks.join(separator),
            block_count: blocks.len(),
            failed: false,
        }
    }

    /// Content standing in for a file that could not be parsed
    pub fn diagnostic(message: impl Into<String>) -> Self {
        Self {
            preview: message.into(),
            full_text: String::new(),
            block_count: 0,
            failed: true,
        }
    }

    /// SHA-256 of the full text, absent for diagnostics
    pub fn content_hash(&self) -> Option<String> {
        (!self.failed).then(|| hash_content(&self.full_text))
    }
}

/// Format-aware parsers sharing one conversion collaborator
pub struct FormatParsers {
    converter: Arc<dyn DocumentConverter>,
    preview_blocks: usize,
    pdf_timeout: Duration,
    max_file_bytes: u64,
}

impl FormatParsers {
    pub fn new(converter: Arc<dyn DocumentConverter>, config: &IngestionConfig) -> Self {
        Self {
            converter,
            preview_blocks: config.preview_blocks.max(1),
            pdf_timeout: Duration::from_secs(config.pdf_timeout_secs),
            max_file_bytes: config.max_download_bytes,
        }
    }

    /// Largest file, downloaded or unpacked, that is accepted for parsing
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Parse `path` as `kind`, converting any failure into a diagnostic
    pub fn parse(&self, path: &Path, kind: FileKind) -> ParsedContent {
        match self.try_parse(path, kind) {
            Ok(content) => {
                tracing::debug!(
                    "Parsed {} as {} ({} blocks)",
                    path.display(),
                    kind.display_name(),
                    content.block_count
                );
                content
            }
            Err(e) => {
                tracing::warn!("Parsing {} failed: {}", path.display(), e);
                ParsedContent::diagnostic(e.to_string())
            }
        }
    }

    /// Parse `path` as `kind`, surfacing failures
    pub fn try_parse(&self, path: &Path, kind: FileKind) -> Result<ParsedContent> {
        let name = display_name(path);
        match kind {
            FileKind::Pdf => {
                let blocks = self.pdf_blocks(path, &name)?;
                Ok(ParsedContent::from_blocks(&blocks, self.preview_blocks))
            }
            FileKind::WordModern => {
                let blocks = docx_blocks(&std::fs::read(path)?, &name)?;
                Ok(ParsedContent::from_blocks(&blocks, self.preview_blocks))
            }
            FileKind::WordLegacy => {
                tracing::info!(
                    "Converting legacy Word file {} with {}",
                    name,
                    self.converter.name()
                );
                let converted = self.converter.convert(path)?;
                let blocks = docx_blocks(&std::fs::read(converted.path())?, &name)?;
                Ok(ParsedContent::from_blocks(&blocks, self.preview_blocks))
            }
            FileKind::Spreadsheet => {
                let rows = spreadsheet_rows(path, &name)?;
                Ok(ParsedContent::from_blocks(&rows, self.preview_blocks))
            }
            FileKind::Csv => {
                let rows = csv_rows(path, &name)?;
                Ok(ParsedContent::from_blocks(&rows, self.preview_blocks))
            }
            FileKind::Html => {
                let blocks = html_blocks(&std::fs::read(path)?, &name)?;
                Ok(ParsedContent::from_blocks(&blocks, self.preview_blocks))
            }
            FileKind::PlainText => {
                let text = String::from_utf8_lossy(&std::fs::read(path)?).to_string();
                let blocks = split_blocks(&text);
                Ok(ParsedContent::joined(&blocks, self.preview_blocks, "\n\n"))
            }
            FileKind::Archive | FileKind::Unsupported => Err(Error::UnsupportedFileType(
                format!("{} cannot be parsed as text", name),
            )),
        }
    }

    fn pdf_blocks(&self, path: &Path, name: &str) -> Result<Vec<String>> {
        let data = std::fs::read(path)?;
        let text = self.extract_pdf_text(data, name)?;
        let blocks = split_blocks(&cleanup_pdf_text(&text));
        if blocks.is_empty() {
            return Err(Error::file_parse(
                name,
                "No text content could be extracted from PDF",
            ));
        }
        Ok(blocks)
    }

    /// Run pdf-extract on a worker thread, falling back to lopdf on error or timeout
    fn extract_pdf_text(&self, data: Vec<u8>, name: &str) -> Result<String> {
        let (tx, rx) = mpsc::channel();
        let worker_data = data.clone();
        thread::spawn(move || {
            let result = pdf_extract::extract_text_from_mem(&worker_data).map_err(|e| e.to_string());
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.pdf_timeout) {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => {
                tracing::debug!("pdf-extract found no text in {}, trying lopdf", name);
                lopdf_text(&data, name)
            }
            Ok(Err(e)) => {
                tracing::warn!("pdf-extract failed on {}: {}, trying lopdf", name, e);
                lopdf_text(&data, name)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::error!(
                    "PDF extraction of {} timed out after {:?}, trying lopdf",
                    name,
                    self.pdf_timeout
                );
                lopdf_text(&data, name)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("PDF extraction thread for {} crashed, trying lopdf", name);
                lopdf_text(&data, name)
            }
        }
    }
}

fn lopdf_text(data: &[u8], name: &str) -> Result<String> {
    let doc = lopdf::Document::load_mem(data)
        .map_err(|e| Error::file_parse(name, format!("Failed to load PDF: {}", e)))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text),
            Ok(_) => {}
            Err(e) => tracing::debug!("No text on page {} of {}: {}", page_number, name, e),
        }
    }

    if pages.is_empty() {
        return Err(Error::file_parse(
            name,
            "PDF appears to be image-based or has no extractable text",
        ));
    }
    Ok(pages.join("\n\n"))
}

fn glyph_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[(<]uni([0-9A-Fa-f]{4})[)>]").ok())
        .as_ref()
}

/// Decode leaked glyph names and normalize ligatures and odd whitespace
fn cleanup_pdf_text(text: &str) -> String {
    let decoded = match glyph_pattern() {
        Some(pattern) => pattern
            .replace_all(text, |caps: &Captures| {
                u32::from_str_radix(&caps[1], 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned(),
        None => text.to_string(),
    };

    decoded
        .replace('\0', "")
        .replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
}

/// Split text into blank-line separated blocks with trimmed lines
pub fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn docx_blocks(data: &[u8], name: &str) -> Result<Vec<String>> {
    let docx = docx_rs::read_docx(data)
        .map_err(|e| Error::file_parse(name, format!("Failed to open DOCX file: {}", e)))?;

    let mut blocks = Vec::new();
    let mut rows = Vec::new();

    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(paragraph) => {
                let text = paragraph_text(paragraph);
                if text.trim().is_empty() {
                    continue;
                }
                if is_heading(paragraph) {
                    blocks.push(format!("\n{}\n", text));
                } else {
                    blocks.push(text);
                }
            }
            DocumentChild::Table(table) => table_rows(table, &mut rows),
            _ => {}
        }
    }

    blocks.extend(rows);
    Ok(blocks)
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    push_paragraph_children(&paragraph.children, &mut text);
    text
}

fn push_paragraph_children(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for run_child in &run.children {
                    match run_child {
                        RunChild::Text(t) => out.push_str(&t.text),
                        RunChild::Tab(_) => out.push('\t'),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => push_paragraph_children(&link.children, out),
            _ => {}
        }
    }
}

fn is_heading(paragraph: &Paragraph) -> bool {
    paragraph
        .property
        .style
        .as_ref()
        .map(|style| style.val.to_ascii_lowercase().starts_with("heading"))
        .unwrap_or(false)
}

/// Render table rows; empty cells become a single space, all-empty rows are dropped
fn table_rows(table: &Table, out: &mut Vec<String>) {
    for child in &table.rows {
        #[allow(irrefutable_let_patterns)]
        let TableChild::TableRow(row) = child else {
            continue;
        };

        let cells: Vec<String> = row
            .cells
            .iter()
            .filter_map(|cell| {
                #[allow(irrefutable_let_patterns)]
                if let TableRowChild::TableCell(cell) = cell {
                    Some(cell_text(cell))
                } else {
                    None
                }
            })
            .collect();

        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        out.push(
            cells
                .iter()
                .map(|c| if c.is_empty() { " " } else { c.as_str() })
                .collect::<Vec<_>>()
                .join(CELL_DELIMITER),
        );
    }
}

fn cell_text(cell: &TableCell) -> String {
    cell.children
        .iter()
        .filter_map(|content| match content {
            TableCellContent::Paragraph(p) => Some(paragraph_text(p)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn spreadsheet_rows(path: &Path, name: &str) -> Result<Vec<String>> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| Error::file_parse(name, format!("Failed to open spreadsheet: {}", e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let multi_sheet = sheet_names.len() > 1;
    let mut rows = Vec::new();
    let mut data_rows = 0usize;

    for sheet_name in sheet_names {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}' of {}: {}", sheet_name, name, e);
                continue;
            }
        };

        let mut sheet_rows = Vec::new();
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(cell_to_string).collect();
            if cells.iter().any(|c| !c.is_empty()) {
                sheet_rows.push(cells.join(CELL_DELIMITER));
            }
        }
        if sheet_rows.is_empty() {
            continue;
        }

        // first non-empty row is the header
        data_rows += sheet_rows.len() - 1;
        if multi_sheet {
            rows.push(format!("Sheet: {}", sheet_name));
        }
        rows.extend(sheet_rows);
    }

    if data_rows == 0 {
        return Err(Error::file_parse(name, "Empty file"));
    }
    Ok(rows)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.trim().to_string(),
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Int(i) => i.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::DateTime(dt) => dt.to_string(),
        calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
        calamine::Data::Error(e) => format!("{:?}", e),
    }
}

fn csv_rows(path: &Path, name: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::file_parse(name, format!("Failed to parse: {}", e)))?;

    let mut rows = Vec::new();
    let headers = reader
        .headers()
        .map_err(|e| Error::file_parse(name, format!("Failed to parse: {}", e)))?
        .clone();
    if !headers.is_empty() {
        rows.push(headers.iter().collect::<Vec<_>>().join(CELL_DELIMITER));
    }

    let mut data_rows = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| Error::file_parse(name, format!("Failed to parse: {}", e)))?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().collect::<Vec<_>>().join(CELL_DELIMITER));
        data_rows += 1;
    }

    if data_rows == 0 {
        return Err(Error::file_parse(name, "Empty file"));
    }
    Ok(rows)
}

fn html_blocks(data: &[u8], name: &str) -> Result<Vec<String>> {
    let html = String::from_utf8_lossy(data);
    let document = scraper::Html::parse_document(&html);
    let body = scraper::Selector::parse("body")
        .map_err(|e| Error::file_parse(name, format!("Invalid selector: {:?}", e)))?;

    let blocks: Vec<String> = document
        .select(&body)
        .flat_map(|element| element.text())
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
        .collect();

    if blocks.is_empty() {
        return Err(Error::file_parse(name, "No text content in HTML body"));
    }
    Ok(blocks)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Hash content for deduplication
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}


/// On-disk documents built in tests
#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::io::Write;
    use std::path::Path;

    /// Single-page PDF with one text line per entry of `lines`
    pub fn write_pdf(path: &Path, lines: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let y = 750 - (i as i64) * 60;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 14.into()]));
            operations.push(Operation::new("Td", vec![72.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn cell_xml(row: usize, column: usize, value: &str) -> String {
        let reference = format!("{}{}", (b'A' + column as u8) as char, row);
        match value.parse::<f64>() {
            Ok(_) => format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value),
            Err(_) => format!(
                r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                reference, value
            ),
        }
    }

    /// Minimal xlsx workbook; each sheet is a name and its rows of cells
    pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        );
        let mut sheet_entries = String::new();
        let mut relationships = String::new();

        for (i, (name, rows)) in sheets.iter().enumerate() {
            let n = i + 1;
            content_types.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                n
            ));
            sheet_entries.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                name, n, n
            ));
            relationships.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="{}/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                n, REL_NS, n
            ));

            let mut sheet_data = String::new();
            for (r, cells) in rows.iter().enumerate() {
                sheet_data.push_str(&format!(r#"<row r="{}">"#, r + 1));
                for (c, value) in cells.iter().enumerate() {
                    if !value.is_empty() {
                        sheet_data.push_str(&cell_xml(r + 1, c, value));
                    }
                }
                sheet_data.push_str("</row>");
            }
            zip.start_file(format!("xl/worksheets/sheet{}.xml", n), options).unwrap();
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{}"><sheetData>{}</sheetData></worksheet>"#,
                MAIN_NS, sheet_data
            )
            .unwrap();
        }
        content_types.push_str("</Types>");

        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(content_types.as_bytes()).unwrap();

        zip.start_file("_rels/.rels", options).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
            REL_NS
        )
        .unwrap();

        zip.start_file("xl/workbook.xml", options).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="{}" xmlns:r="{}"><sheets>{}</sheets></workbook>"#,
            MAIN_NS, REL_NS, sheet_entries
        )
        .unwrap();

        zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
            relationships
        )
        .unwrap();

        zip.finish().unwrap();
    }
}
