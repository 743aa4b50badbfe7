//! Typed semantic extraction result and its record shape
//!
//! The structs here are what an extraction materializes into. Their shapes are
//! spelled out by hand in [`SemanticTenderDetail::shape`] so the contract sent
//! to the generation service and the typed result never drift apart silently;
//! `test_shape_round_trips_into_struct` guards that.

use serde::{Deserialize, Serialize};

use crate::extraction::schema::{FieldKind, FieldSpec, RecordShape};

/// Language used for human-readable summaries in the extracted record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionLanguage {
    English,
    #[default]
    Czech,
}

impl ExtractionLanguage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Czech => "Czech",
        }
    }
}

/// Estimated value band
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenderSize {
    /// < 10k EUR
    Xs,
    /// 10k - 100k EUR
    S,
    /// 100k - 1M EUR
    M,
    /// 1M - 10M EUR
    L,
    /// > 10M EUR
    Xl,
}

impl TenderSize {
    pub const VALUES: [&'static str; 5] = ["xs", "s", "m", "l", "xl"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xs => "xs",
            Self::S => "s",
            Self::M => "m",
            Self::L => "l",
            Self::Xl => "xl",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenderComplexity {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl TenderComplexity {
    pub const VALUES: [&'static str; 5] = ["very_low", "low", "medium", "high", "very_high"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Scoring and matching data for company-tender alignment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TenderMatchingProfile {
    pub technical_complexity_score: Option<f64>,
    pub financial_attractiveness_score: Option<f64>,
    pub competition_intensity_score: Option<f64>,
    pub urgency_score: Option<f64>,
    pub tender_size_category: Option<TenderSize>,
    pub complexity_category: Option<TenderComplexity>,
    pub complexity_justification: Option<String>,
    pub attractiveness_justification: Option<String>,
    pub competition_justification: Option<String>,
    #[serde(default)]
    pub preferred_company_size: Vec<String>,
    #[serde(default)]
    pub required_experience_level: Vec<String>,
    #[serde(default)]
    pub collaboration_model: Vec<String>,
}

/// Tags used for vector search matching
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnhancedSemanticTags {
    #[serde(default)]
    pub technology_stack: Vec<String>,
    #[serde(default)]
    pub domain_expertise: Vec<String>,
    #[serde(default)]
    pub service_types: Vec<String>,
    #[serde(default)]
    pub methodologies: Vec<String>,
    #[serde(default)]
    pub required_certifications: Vec<String>,
    #[serde(default)]
    pub language_requirements: Vec<String>,
    #[serde(default)]
    pub location_preferences: Vec<String>,
}

/// Narrative and tag data extracted from tender documents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmExtractedData {
    pub executive_summary: Option<String>,
    pub technical_summary: Option<String>,
    pub scope_and_deliverables: Option<String>,
    #[serde(default)]
    pub semantic_tags: Option<EnhancedSemanticTags>,
    #[serde(default)]
    pub matching_profile: Option<TenderMatchingProfile>,
    #[serde(default)]
    pub key_technologies_or_skills: Vec<String>,
    #[serde(default)]
    pub main_challenges_or_risks: Vec<String>,
    pub evaluation_criteria_summary: Option<String>,
    pub target_vendor_profile: Option<String>,
    pub budget_and_timeline_context: Option<String>,
    #[serde(default)]
    pub searchable_keywords: Vec<String>,
}

/// Final semantic record for one tender
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticTenderDetail {
    #[serde(default)]
    pub llm_extracted: Option<LlmExtractedData>,
    pub estimated_value_eur_computed: Option<f64>,
    pub technical_complexity_score: Option<f64>,
    pub financial_attractiveness_score: Option<f64>,
    pub market_opportunity_score: Option<f64>,
    pub competition_risk_score: Option<f64>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
    #[serde(default)]
    pub technology_tags: Vec<String>,
    #[serde(default)]
    pub domain_tags: Vec<String>,
    #[serde(default)]
    pub service_tags: Vec<String>,
    pub data_completeness_score: Option<f64>,
    pub extraction_confidence_score: Option<f64>,
}

fn strings() -> FieldKind {
    FieldKind::list_of(FieldKind::String)
}

fn score(name: &str, description: &str) -> FieldSpec {
    FieldSpec::optional(name, FieldKind::Number).describe(description)
}

impl TenderMatchingProfile {
    pub fn shape(language: ExtractionLanguage) -> RecordShape {
        let lang = language.display_name();
        RecordShape::new("TenderMatchingProfile")
            .field(score(
                "technical_complexity_score",
                "Technical complexity score from 0-10 (0=very simple, 10=extremely complex)",
            ))
            .field(score(
                "financial_attractiveness_score",
                "Financial attractiveness score from 0-10 based on value, payment terms, risk",
            ))
            .field(score(
                "competition_intensity_score",
                "Expected competition intensity from 0-10 (0=low competition, 10=very high competition)",
            ))
            .field(score(
                "urgency_score",
                "Urgency score from 0-10 based on timeline and deadline pressure",
            ))
            .field(
                FieldSpec::optional(
                    "tender_size_category",
                    FieldKind::enumeration(TenderSize::VALUES),
                )
                .describe(format!(
                    "Size category based on estimated value: {:?}",
                    TenderSize::VALUES
                )),
            )
            .field(
                FieldSpec::optional(
                    "complexity_category",
                    FieldKind::enumeration(TenderComplexity::VALUES),
                )
                .describe("Overall complexity category"),
            )
            .field(
                FieldSpec::optional("complexity_justification", FieldKind::String).describe(
                    format!("Brief explanation of complexity assessment (2-3 sentences in {lang})"),
                ),
            )
            .field(
                FieldSpec::optional("attractiveness_justification", FieldKind::String).describe(
                    format!("Brief explanation of financial attractiveness (2-3 sentences in {lang})"),
                ),
            )
            .field(
                FieldSpec::optional("competition_justification", FieldKind::String).describe(
                    format!("Brief explanation of expected competition level (2-3 sentences in {lang})"),
                ),
            )
            .field(
                FieldSpec::required("preferred_company_size", strings())
                    .describe("Preferred company sizes for this tender"),
            )
            .field(FieldSpec::required("required_experience_level", strings()).describe(
                "Required experience levels: 'junior', 'mid', 'senior', 'expert', 'specialist'",
            ))
            .field(FieldSpec::required("collaboration_model", strings()).describe(
                "Expected collaboration models: 'individual', 'small_team', 'large_team', \
                 'consortium', 'subcontracting'",
            ))
    }
}

impl EnhancedSemanticTags {
    pub fn shape() -> RecordShape {
        RecordShape::new("EnhancedSemanticTags")
            .field(FieldSpec::required("technology_stack", strings()).describe(
                "Specific technologies, tools or systems mentioned, e.g. 'java', 'aws', 'sap', \
                 'autocad', 'machinery'",
            ))
            .field(
                FieldSpec::required("domain_expertise", strings())
                    .describe("Domain areas or industry sectors"),
            )
            .field(
                FieldSpec::required("service_types", strings())
                    .describe("Types of services requested, e.g. 'consulting', 'maintenance'"),
            )
            .field(
                FieldSpec::required("methodologies", strings())
                    .describe("Project or delivery methodologies, e.g. 'agile', 'prince2'"),
            )
            .field(
                FieldSpec::required("required_certifications", strings())
                    .describe("Certifications and compliance requirements, e.g. 'iso_9001'"),
            )
            .field(
                FieldSpec::required("language_requirements", strings())
                    .describe("Languages required for delivery and communication"),
            )
            .field(
                FieldSpec::required("location_preferences", strings())
                    .describe("Places of performance or location constraints"),
            )
    }
}

impl LlmExtractedData {
    pub fn shape(language: ExtractionLanguage) -> RecordShape {
        let lang = language.display_name();
        RecordShape::new("LlmExtractedData")
            .field(
                FieldSpec::required("executive_summary", FieldKind::String).describe(format!(
                    "Concise executive summary of the tender (3-5 sentences in {lang})"
                )),
            )
            .field(
                FieldSpec::optional("technical_summary", FieldKind::String)
                    .describe(format!("Summary of technical requirements (in {lang})")),
            )
            .field(
                FieldSpec::optional("scope_and_deliverables", FieldKind::String)
                    .describe(format!("Scope of work and expected deliverables (in {lang})")),
            )
            .field(
                FieldSpec::optional(
                    "semantic_tags",
                    FieldKind::Nested(EnhancedSemanticTags::shape()),
                )
                .describe("Enhanced semantic tags for vector search"),
            )
            .field(
                FieldSpec::optional(
                    "matching_profile",
                    FieldKind::Nested(TenderMatchingProfile::shape(language)),
                )
                .describe("Scoring and matching profile"),
            )
            .field(
                FieldSpec::required("key_technologies_or_skills", strings())
                    .describe("Specific technologies and skills with standardized names"),
            )
            .field(
                FieldSpec::required("main_challenges_or_risks", strings())
                    .describe("Main delivery challenges or risks"),
            )
            .field(
                FieldSpec::optional("evaluation_criteria_summary", FieldKind::String)
                    .describe(format!("How bids will be evaluated (in {lang})")),
            )
            .field(
                FieldSpec::optional("target_vendor_profile", FieldKind::String)
                    .describe(format!("Description of the ideal bidder (in {lang})")),
            )
            .field(
                FieldSpec::optional("budget_and_timeline_context", FieldKind::String)
                    .describe(format!("Budget and timeline context (in {lang})")),
            )
            .field(
                FieldSpec::required("searchable_keywords", strings())
                    .describe("Searchable keywords in Czech and English"),
            )
    }
}

impl SemanticTenderDetail {
    /// Field holding the per-fragment confidence read by the accumulation engine
    pub const CONFIDENCE_FIELD: &'static str = "extraction_confidence_score";

    pub fn shape(language: ExtractionLanguage) -> RecordShape {
        RecordShape::new("SemanticTenderDetail")
            .field(
                FieldSpec::optional(
                    "llm_extracted",
                    FieldKind::Nested(LlmExtractedData::shape(language)),
                )
                .describe("Enhanced structured semantic data extracted by the LLM."),
            )
            .field(score(
                "estimated_value_eur_computed",
                "Estimated total value in EUR computed from documents",
            ))
            .field(score("technical_complexity_score", "Technical complexity score (0-10)"))
            .field(score(
                "financial_attractiveness_score",
                "Financial attractiveness score (0-10)",
            ))
            .field(score("market_opportunity_score", "Market opportunity score (0-10)"))
            .field(score("competition_risk_score", "Competition risk score (0-10)"))
            .field(
                FieldSpec::required("semantic_tags", strings())
                    .describe("Primary semantic tags for vector search"),
            )
            .field(FieldSpec::required("technology_tags", strings()).describe("Technology-specific tags"))
            .field(
                FieldSpec::required("domain_tags", strings())
                    .describe("Business domain and industry tags"),
            )
            .field(
                FieldSpec::required("service_tags", strings())
                    .describe("Service type and methodology tags"),
            )
            .field(score(
                "data_completeness_score",
                "Score indicating data quality and completeness (0-1)",
            ))
            .field(score(
                Self::CONFIDENCE_FIELD,
                "Confidence in LLM extraction quality (0-1)",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::schema::{conform, SchemaCompiler};
    use serde_json::json;

    #[test]
    fn test_shape_round_trips_into_struct() {
        let shape = SemanticTenderDetail::shape(ExtractionLanguage::English);
        let skeleton = SchemaCompiler::skeleton(&shape);
        let detail: SemanticTenderDetail =
            serde_json::from_value(serde_json::Value::Object(skeleton)).unwrap();

        let extracted = detail.llm_extracted.unwrap();
        assert!(extracted.executive_summary.is_none());
        assert!(extracted.semantic_tags.unwrap().technology_stack.is_empty());
        assert!(detail.semantic_tags.is_empty());
        assert!(detail.extraction_confidence_score.is_none());
    }

    #[test]
    fn test_conformed_aggregate_deserializes_enums() {
        let shape = SemanticTenderDetail::shape(ExtractionLanguage::Czech);
        let data = json!({
            "llm_extracted": {
                "executive_summary": "Oprava silnice",
                "matching_profile": { "tender_size_category": "M", "complexity_category": "Very_High" }
            },
            "technology_tags": ["asphalt"],
            "extraction_confidence_score": 0.8
        });
        let conformed = conform(&shape, data.as_object().unwrap());
        let detail: SemanticTenderDetail =
            serde_json::from_value(serde_json::Value::Object(conformed)).unwrap();

        let profile = detail.llm_extracted.unwrap().matching_profile.unwrap();
        assert_eq!(profile.tender_size_category, Some(TenderSize::M));
        assert_eq!(profile.complexity_category, Some(TenderComplexity::VeryHigh));
        assert_eq!(detail.technology_tags, vec!["asphalt".to_string()]);
        assert_eq!(detail.extraction_confidence_score, Some(0.8));
    }

    #[test]
    fn test_language_variants_differ_only_in_descriptions() {
        let en = SemanticTenderDetail::shape(ExtractionLanguage::English);
        let cz = SemanticTenderDetail::shape(ExtractionLanguage::Czech);
        assert_eq!(SchemaCompiler::skeleton(&en), SchemaCompiler::skeleton(&cz));
        assert_ne!(en, cz);
    }
}
