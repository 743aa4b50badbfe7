//! Generation service clients

pub mod generator;
pub mod ollama;
pub mod openai;

pub use generator::{generator_from_config, retry_request, StructuredGenerator};
pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;
