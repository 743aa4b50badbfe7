//! Tender aggregate root and its processing lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::document::{DocumentDescriptor, DocumentRecord};
use super::semantic::SemanticTenderDetail;

/// Forward-only lifecycle of a tender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    #[default]
    RawScraped,
    UnifiedMapped,
    DocumentsParsed,
    SemanticProcessed,
    VectorIndexed,
    Completed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawScraped => "raw_scraped",
            Self::UnifiedMapped => "unified_mapped",
            Self::DocumentsParsed => "documents_parsed",
            Self::SemanticProcessed => "semantic_processed",
            Self::VectorIndexed => "vector_indexed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lot within a multi-lot tender
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TenderLot {
    pub lot_id: String,
    pub lot_number: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cpv_code: Option<String>,
    pub cpv_description: Option<String>,
    pub estimated_value_eur: Option<f64>,
    pub estimated_value_original: Option<String>,
    pub currency_original: Option<String>,
    pub location: Option<String>,
    pub items: Vec<TenderItem>,
}

/// An item or product within a tender or lot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TenderItem {
    pub item_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub cpv_code: Option<String>,
    pub estimated_unit_price: Option<f64>,
    pub estimated_total_price: Option<f64>,
    pub currency: Option<String>,
}

/// Maximum number of items embedded in generation metadata
const METADATA_ITEM_LIMIT: usize = 20;

/// Unified tender record, mutated in place by every pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TenderRecord {
    /// Unique across all sources, e.g. "NEN_N006/25/V00015462"
    pub tender_id: String,
    pub source_system: String,
    pub source_tender_id: String,

    pub raw_scraped_data: Map<String, Value>,
    pub source_metadata: Map<String, Value>,

    pub title: Option<String>,
    pub description: Option<String>,
    pub contracting_authority: Option<String>,
    pub contracting_authority_type: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_person: Option<String>,

    pub cpv_code: Option<String>,
    pub cpv_description: Option<String>,
    pub contract_type: Option<String>,
    pub procedure_type: Option<String>,

    pub status: Option<String>,
    pub publication_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub opening_date: Option<DateTime<Utc>>,
    pub estimated_start_date: Option<DateTime<Utc>>,
    pub estimated_end_date: Option<DateTime<Utc>>,
    pub estimated_duration_days: Option<i64>,

    pub estimated_value_eur: Option<f64>,
    pub estimated_value_original: Option<String>,
    pub currency_original: Option<String>,
    pub tender_size: Option<String>,
    pub vat_included: Option<bool>,

    pub location: Option<String>,
    pub location_code: Option<String>,
    pub country_code: Option<String>,
    pub nuts_code: Option<String>,

    pub is_framework: bool,
    pub has_lots: bool,
    pub lots: Vec<TenderLot>,
    pub items: Vec<TenderItem>,

    pub eligibility_criteria: Vec<String>,
    pub required_qualifications: Vec<String>,
    pub languages: Vec<String>,

    pub detail_url: Option<String>,
    pub documents_url: Option<String>,
    pub related_notices: Vec<String>,

    /// Documents to ingest, as supplied by the upstream mapper
    pub document_infos: Vec<DocumentDescriptor>,
    pub parsed_documents: Vec<DocumentRecord>,

    pub semantic_data: Option<SemanticTenderDetail>,

    processing_stage: ProcessingStage,
    pub scraped_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_errors: Vec<String>,
    pub processing_warnings: Vec<String>,
    pub data_quality_score: Option<f64>,
}

impl TenderRecord {
    /// Create a freshly mapped tender
    pub fn new(
        tender_id: impl Into<String>,
        source_system: impl Into<String>,
        source_tender_id: impl Into<String>,
    ) -> Self {
        Self {
            tender_id: tender_id.into(),
            source_system: source_system.into(),
            source_tender_id: source_tender_id.into(),
            processing_stage: ProcessingStage::UnifiedMapped,
            scraped_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Stable id derived from `tender_id`
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, self.tender_id.as_bytes())
    }

    pub fn stage(&self) -> ProcessingStage {
        self.processing_stage
    }

    /// Move the tender forward to `stage`
    ///
    /// Re-entering the current stage is a no-op; moving backwards is an error
    /// and leaves the stage untouched.
    pub fn advance_to(&mut self, stage: ProcessingStage) -> Result<()> {
        if stage < self.processing_stage {
            return Err(Error::StageRegression {
                from: self.processing_stage,
                to: stage,
            });
        }
        if stage != self.processing_stage {
            tracing::debug!(
                "Tender {} stage {} -> {}",
                self.tender_id,
                self.processing_stage,
                stage
            );
            self.processing_stage = stage;
        }
        Ok(())
    }

    pub fn add_processing_error(&mut self, error: impl fmt::Display, stage: Option<&str>) {
        self.processing_errors.push(tag_message(error, stage));
    }

    pub fn add_processing_warning(&mut self, warning: impl fmt::Display, stage: Option<&str>) {
        self.processing_warnings.push(tag_message(warning, stage));
    }

    pub fn add_parsed_document(&mut self, document: DocumentRecord) {
        self.parsed_documents.push(document);
    }

    pub fn has_documents(&self) -> bool {
        !self.document_infos.is_empty()
    }

    pub fn is_documents_parsed(&self) -> bool {
        !self.parsed_documents.is_empty()
    }

    /// Parsed documents, restricted to `ids` when given
    pub fn important_documents(&self, ids: Option<&[String]>) -> Vec<&DocumentRecord> {
        match ids {
            None => self.parsed_documents.iter().collect(),
            Some(ids) => self
                .parsed_documents
                .iter()
                .filter(|d| ids.contains(&d.id))
                .collect(),
        }
    }

    /// All CPV codes of the tender, its lots and items, deduplicated
    pub fn all_cpv_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.cpv_code.as_ref())
            .chain(self.lots.iter().map(|l| l.cpv_code.as_ref()))
            .chain(self.items.iter().map(|i| i.cpv_code.as_ref()))
            .flatten();
        for code in candidates {
            if !codes.contains(code) {
                codes.push(code.clone());
            }
        }
        codes
    }

    /// Declared value, else the sum of lot values, else the extracted estimate
    pub fn total_estimated_value(&self) -> Option<f64> {
        if let Some(value) = self.estimated_value_eur.filter(|v| *v > 0.0) {
            return Some(value);
        }
        if !self.lots.is_empty() {
            let total: f64 = self.lots.iter().filter_map(|l| l.estimated_value_eur).sum();
            if total > 0.0 {
                return Some(total);
            }
        }
        self.semantic_data
            .as_ref()
            .and_then(|s| s.estimated_value_eur_computed)
    }

    /// Metadata known before semantic extraction, embedded in every prompt
    pub fn prepare_metadata_for_llm(&self) -> Value {
        let date = |d: &Option<DateTime<Utc>>| d.map(|d| d.to_rfc3339());

        let mut metadata = json!({
            "tender_id": self.tender_id,
            "source_system": self.source_system,
            "source_tender_id": self.source_tender_id,
            "title": self.title,
            "description": self.description,
            "contracting_authority": self.contracting_authority,
            "contracting_authority_type": self.contracting_authority_type,
            "cpv_code": self.cpv_code,
            "cpv_description": self.cpv_description,
            "contract_type": self.contract_type,
            "procedure_type": self.procedure_type,
            "status": self.status,
            "publication_date": date(&self.publication_date),
            "deadline": date(&self.deadline),
            "opening_date": date(&self.opening_date),
            "estimated_start_date": date(&self.estimated_start_date),
            "estimated_end_date": date(&self.estimated_end_date),
            "estimated_duration_days": self.estimated_duration_days,
            "estimated_value_eur": self.estimated_value_eur,
            "estimated_value_original": self.estimated_value_original,
            "currency_original": self.currency_original,
            "vat_included": self.vat_included,
            "location": self.location,
            "location_code": self.location_code,
            "country_code": self.country_code,
            "nuts_code": self.nuts_code,
            "is_framework": self.is_framework,
            "has_lots": self.has_lots,
            "lots_count": self.lots.len(),
            "items_count": self.items.len(),
            "eligibility_criteria": self.eligibility_criteria,
            "required_qualifications": self.required_qualifications,
            "languages": self.languages,
            "detail_url": self.detail_url,
            "documents_url": self.documents_url,
            "related_notices": self.related_notices,
        });

        if let Value::Object(map) = &mut metadata {
            if !self.lots.is_empty() {
                let lots: Vec<Value> = self
                    .lots
                    .iter()
                    .map(|lot| {
                        json!({
                            "lot_id": lot.lot_id,
                            "lot_number": lot.lot_number,
                            "title": lot.title,
                            "description": lot.description,
                            "cpv_code": lot.cpv_code,
                            "cpv_description": lot.cpv_description,
                            "estimated_value_eur": lot.estimated_value_eur,
                            "estimated_value_original": lot.estimated_value_original,
                            "currency_original": lot.currency_original,
                            "location": lot.location,
                            "items_count": lot.items.len(),
                        })
                    })
                    .collect();
                map.insert("lots".to_string(), Value::Array(lots));
            }

            if !self.items.is_empty() {
                let items: Vec<Value> = self
                    .items
                    .iter()
                    .take(METADATA_ITEM_LIMIT)
                    .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
                    .collect();
                map.insert("items".to_string(), Value::Array(items));
            }

            map.insert(
                "processing_context".to_string(),
                json!({
                    "processing_stage": self.processing_stage.as_str(),
                    "has_documents": self.has_documents(),
                    "documents_parsed": self.is_documents_parsed(),
                    "scraped_at": date(&self.scraped_at),
                    "data_quality_score": self.data_quality_score,
                }),
            );
        }

        metadata
    }

    fn primary_search_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(title) = &self.title {
            fields.push(format!("Title: {}", title));
        }
        if let Some(extracted) = self.llm_extracted() {
            if let Some(summary) = &extracted.executive_summary {
                fields.push(format!("Executive summary: {}", summary));
            }
            if let Some(scope) = &extracted.scope_and_deliverables {
                fields.push(format!("Scope and deliverables: {}", scope));
            }
        }
        fields
    }

    fn secondary_search_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(description) = &self.description {
            fields.push(format!("Description: {}", description));
        }
        if let Some(extracted) = self.llm_extracted() {
            if !extracted.key_technologies_or_skills.is_empty() {
                fields.push(format!(
                    "Required technologies: {}",
                    extracted.key_technologies_or_skills.join(", ")
                ));
            }
            if let Some(profile) = &extracted.target_vendor_profile {
                fields.push(format!("Target vendor profile: {}", profile));
            }
            if !extracted.searchable_keywords.is_empty() {
                fields.push(format!("Keywords: {}", extracted.searchable_keywords.join(", ")));
            }
            if let Some(tags) = &extracted.semantic_tags {
                if !tags.technology_stack.is_empty() {
                    fields.push(format!("Technology stack: {}", tags.technology_stack.join(", ")));
                }
                if !tags.service_types.is_empty() {
                    fields.push(format!("Service types: {}", tags.service_types.join(", ")));
                }
            }
        }
        fields
    }

    fn tertiary_search_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        let labelled = [
            ("Contracting authority", &self.contracting_authority),
            ("Contract type", &self.contract_type),
            ("Procedure type", &self.procedure_type),
            ("CPV", &self.cpv_description),
        ];
        for (label, value) in labelled {
            if let Some(value) = value {
                fields.push(format!("{}: {}", label, value));
            }
        }
        if let Some(extracted) = self.llm_extracted() {
            if let Some(profile) = &extracted.matching_profile {
                if let Some(complexity) = profile.complexity_category {
                    fields.push(format!("Complexity: {}", complexity.as_str()));
                }
                if let Some(size) = profile.tender_size_category {
                    fields.push(format!("Size category: {}", size.as_str()));
                }
            }
            if let Some(criteria) = &extracted.evaluation_criteria_summary {
                fields.push(format!("Evaluation criteria: {}", criteria));
            }
            if let Some(context) = &extracted.budget_and_timeline_context {
                fields.push(format!("Budget and timeline: {}", context));
            }
        }
        fields
    }

    /// Weighted search text: primary fields three times, secondary twice, tertiary once
    pub fn create_search_text(&self) -> String {
        let primary = self.primary_search_fields();
        let secondary = self.secondary_search_fields();

        let mut parts = Vec::new();
        for _ in 0..3 {
            parts.extend(primary.iter().cloned());
        }
        for _ in 0..2 {
            parts.extend(secondary.iter().cloned());
        }
        parts.extend(self.tertiary_search_fields());

        parts.retain(|p| !p.is_empty());
        parts.join("\n\n")
    }

    /// Filterable payload for the downstream index
    pub fn create_payload(&self) -> Map<String, Value> {
        let base = json!({
            "tender_id": self.tender_id,
            "source_system": self.source_system,
            "title": self.title,
            "contracting_authority": self.contracting_authority,
            "cpv_code": self.cpv_code,
            "estimated_value_eur": self.estimated_value_eur,
            "tender_size": self.tender_size,
            "deadline": self.deadline.map(|d| d.to_rfc3339()),
            "location": self.location,
            "country_code": self.country_code,
            "detail_url": self.detail_url,
            "status": self.status,
            "is_framework": self.is_framework,
            "has_lots": self.has_lots,
        });

        let mut payload: Map<String, Value> = match base {
            Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            _ => Map::new(),
        };

        if let Some(semantic) = &self.semantic_data {
            if let Some(profile) = self.llm_extracted().and_then(|e| e.matching_profile.as_ref()) {
                payload.insert(
                    "complexity_category".to_string(),
                    json!(profile.complexity_category.map(|c| c.as_str())),
                );
                payload.insert(
                    "tender_size_category".to_string(),
                    json!(profile.tender_size_category.map(|s| s.as_str())),
                );
                payload.insert(
                    "preferred_company_size".to_string(),
                    json!(profile.preferred_company_size),
                );
                payload.insert(
                    "required_experience_level".to_string(),
                    json!(profile.required_experience_level),
                );
            }
            payload.insert(
                "technical_complexity_score".to_string(),
                json!(semantic.technical_complexity_score),
            );
            payload.insert(
                "financial_attractiveness_score".to_string(),
                json!(semantic.financial_attractiveness_score),
            );
            payload.insert(
                "market_opportunity_score".to_string(),
                json!(semantic.market_opportunity_score),
            );
            payload.insert(
                "competition_risk_score".to_string(),
                json!(semantic.competition_risk_score),
            );
        }

        payload
    }

    /// Document handed to the downstream indexer
    pub fn vector_document(&self) -> VectorDocument {
        VectorDocument {
            id: self.id(),
            text: self.create_search_text(),
            payload: self.create_payload(),
        }
    }

    fn llm_extracted(&self) -> Option<&super::semantic::LlmExtractedData> {
        self.semantic_data
            .as_ref()
            .and_then(|s| s.llm_extracted.as_ref())
    }
}

/// Materialized text and payload of a tender for vector indexing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorDocument {
    pub id: Uuid,
    pub text: String,
    pub payload: Map<String, Value>,
}

fn tag_message(message: impl fmt::Display, stage: Option<&str>) -> String {
    match stage {
        Some(stage) => format!("[{}] {}", stage, message),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::semantic::{LlmExtractedData, TenderMatchingProfile, TenderSize};

    fn sample_tender() -> TenderRecord {
        let mut tender = TenderRecord::new("NEN_N006/25/V00015462", "NEN", "N006/25/V00015462");
        tender.title = Some("Oprava mostu".to_string());
        tender.description = Some("Rekonstrukce mostu přes řeku".to_string());
        tender.contracting_authority = Some("Město Brno".to_string());
        tender
    }

    #[test]
    fn test_stage_is_forward_only() {
        let mut tender = sample_tender();
        assert_eq!(tender.stage(), ProcessingStage::UnifiedMapped);

        tender.advance_to(ProcessingStage::SemanticProcessed).unwrap();
        tender.advance_to(ProcessingStage::SemanticProcessed).unwrap();

        let err = tender.advance_to(ProcessingStage::DocumentsParsed).unwrap_err();
        assert!(matches!(err, Error::StageRegression { .. }));
        assert_eq!(tender.stage(), ProcessingStage::SemanticProcessed);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(ProcessingStage::RawScraped < ProcessingStage::UnifiedMapped);
        assert!(ProcessingStage::VectorIndexed < ProcessingStage::Completed);
        assert_eq!(
            serde_json::to_string(&ProcessingStage::DocumentsParsed).unwrap(),
            "\"documents_parsed\""
        );
    }

    #[test]
    fn test_id_is_stable() {
        let a = sample_tender();
        let b = TenderRecord::new("NEN_N006/25/V00015462", "other", "other");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().get_version_num(), 5);
    }

    #[test]
    fn test_tagged_messages() {
        let mut tender = sample_tender();
        tender.add_processing_error("boom", Some("semantic"));
        tender.add_processing_warning("no documents", None);
        assert_eq!(tender.processing_errors, vec!["[semantic] boom"]);
        assert_eq!(tender.processing_warnings, vec!["no documents"]);
    }

    #[test]
    fn test_metadata_limits_items() {
        let mut tender = sample_tender();
        tender.items = (0..30)
            .map(|i| TenderItem {
                item_id: i.to_string(),
                ..Default::default()
            })
            .collect();
        let metadata = tender.prepare_metadata_for_llm();
        assert_eq!(metadata["items_count"], 30);
        assert_eq!(metadata["items"].as_array().unwrap().len(), METADATA_ITEM_LIMIT);
        assert_eq!(metadata["processing_context"]["processing_stage"], "unified_mapped");
    }

    #[test]
    fn test_search_text_weighting() {
        let mut tender = sample_tender();
        tender.semantic_data = Some(SemanticTenderDetail {
            llm_extracted: Some(LlmExtractedData {
                executive_summary: Some("Bridge repair".to_string()),
                key_technologies_or_skills: vec!["concrete".to_string()],
                matching_profile: Some(TenderMatchingProfile {
                    tender_size_category: Some(TenderSize::L),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let text = tender.create_search_text();
        assert_eq!(text.matches("Title: Oprava mostu").count(), 3);
        assert_eq!(text.matches("Executive summary: Bridge repair").count(), 3);
        assert_eq!(text.matches("Required technologies: concrete").count(), 2);
        assert_eq!(text.matches("Contracting authority: Město Brno").count(), 1);
        assert!(text.contains("Size category: l"));
    }

    #[test]
    fn test_payload_skips_nulls_and_adds_scores() {
        let mut tender = sample_tender();
        let payload = tender.create_payload();
        assert!(!payload.contains_key("cpv_code"));
        assert_eq!(payload["title"], "Oprava mostu");

        tender.semantic_data = Some(SemanticTenderDetail {
            technical_complexity_score: Some(6.0),
            ..Default::default()
        });
        let payload = tender.create_payload();
        assert_eq!(payload["technical_complexity_score"], 6.0);
    }

    #[test]
    fn test_total_estimated_value_falls_back_to_lots() {
        let mut tender = sample_tender();
        tender.lots = vec![
            TenderLot {
                lot_id: "1".to_string(),
                estimated_value_eur: Some(100.0),
                ..Default::default()
            },
            TenderLot {
                lot_id: "2".to_string(),
                estimated_value_eur: Some(50.0),
                cpv_code: Some("45221000".to_string()),
                ..Default::default()
            },
        ];
        tender.cpv_code = Some("45221000".to_string());
        assert_eq!(tender.total_estimated_value(), Some(150.0));
        assert_eq!(tender.all_cpv_codes(), vec!["45221000".to_string()]);
    }
}
