//! Incremental semantic extraction: budgeting, prompting and merging

pub mod accumulate;
pub mod chunker;
pub mod orchestrator;
pub mod prompt;
pub mod schema;
pub mod selector;
pub mod tokenizer;

pub use accumulate::{AccumulationEngine, Aggregate, ExtractionFragment};
pub use chunker::TokenBudgetChunker;
pub use orchestrator::{ExtractionOrchestrator, ExtractionOutcome, ExtractionState};
pub use prompt::PromptBuilder;
pub use schema::{CompiledShape, ExtractionContract, FieldKind, FieldSpec, RecordShape, SchemaCompiler};
pub use selector::DocumentSelector;
pub use tokenizer::{counter_from_path, HfTokenCounter, SegmentTokenCounter, TokenCounter};
