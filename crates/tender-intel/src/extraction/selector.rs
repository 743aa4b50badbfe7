//! Optional pre-extraction pass picking the documents worth reading

use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::providers::StructuredGenerator;
use crate::types::DocumentRecord;

use super::schema::{ExtractionContract, FieldKind, FieldSpec, RecordShape, SchemaCompiler};

pub const SELECTOR_FUNCTION: &str = "filter_important_documents";

const SELECTOR_PROMPT: &str = "You are a procurement document analyst. From the list of \
documents below, identify the ones that describe the actual tender assignment ('zadání', \
'zadávací dokumentace', technical specifications and requirements). Leave out blank or \
unfilled forms, generic declarations, routine statements and administrative templates \
without tender-specific content. Return only the ids of the documents with concrete \
assignment details by calling filter_important_documents.";

/// Characters of each preview shown to the selector
const PREVIEW_CHARS: usize = 500;

/// Asks the generation service which parsed documents matter
pub struct DocumentSelector {
    generator: Arc<dyn StructuredGenerator>,
    contract: ExtractionContract,
}

impl DocumentSelector {
    pub fn new(generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            generator,
            contract: Self::contract(),
        }
    }

    pub fn contract() -> ExtractionContract {
        let shape = RecordShape::new("DocumentSelection").field(
            FieldSpec::required("document_ids", FieldKind::list_of(FieldKind::String)).describe(
                "List of document IDs that are considered important for public procurement",
            ),
        );
        SchemaCompiler::contract(
            &shape,
            SELECTOR_FUNCTION,
            "Filter and return IDs of important procurement-related documents",
        )
    }

    /// Documents to extract from, in their original order
    ///
    /// Unknown ids are ignored; an empty selection keeps every document.
    pub async fn select<'a>(&self, documents: &'a [DocumentRecord]) -> Result<Vec<&'a DocumentRecord>> {
        let listing = document_listing(documents);
        let fragment = self
            .generator
            .complete(SELECTOR_PROMPT, &listing, &self.contract)
            .await?;

        let ids: Vec<String> = match fragment.get("document_ids") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        for id in &ids {
            if !documents.iter().any(|d| &d.id == id) {
                tracing::warn!("Selector returned unknown document id {}", id);
            }
        }

        let selected: Vec<&DocumentRecord> = documents.iter().filter(|d| ids.contains(&d.id)).collect();
        if selected.is_empty() {
            tracing::info!("Selector kept no documents, using all {}", documents.len());
            return Ok(documents.iter().collect());
        }

        tracing::info!("Selector kept {} of {} documents", selected.len(), documents.len());
        Ok(selected)
    }
}

fn document_listing(documents: &[DocumentRecord]) -> String {
    let entries: Vec<Value> = documents
        .iter()
        .map(|d| {
            serde_json::json!({
                "id": d.id,
                "name": d.name,
                "type": d.kind.to_string(),
                "preview": d.preview.chars().take(PREVIEW_CHARS).collect::<String>(),
            })
        })
        .collect();
    Value::Array(entries).to_string()
}
