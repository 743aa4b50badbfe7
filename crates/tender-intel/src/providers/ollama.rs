//! Ollama chat client constrained to the contract's JSON schema

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::extraction::accumulate::ExtractionFragment;
use crate::extraction::schema::ExtractionContract;

use super::generator::{retry_request, StructuredGenerator};

/// Ollama generator using structured outputs on `/api/chat`
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a Value,
    options: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
        contract: &'a ExtractionContract,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            stream: false,
            format: &contract.parameters,
            options: json!({ "temperature": self.temperature }),
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ExtractionFragment> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::llm(format!("Chat request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::llm(format!("Chat failed: HTTP {}", response.status())));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("Failed to parse chat response: {}", e)))?;

        parse_content(&chat)
    }
}

fn parse_content(chat: &ChatResponse) -> Result<ExtractionFragment> {
    if chat.message.content.trim().is_empty() {
        return Err(Error::decode("Chat response has no content"));
    }
    ExtractionFragment::from_json_str(&chat.message.content)
}

#[async_trait]
impl StructuredGenerator for OllamaGenerator {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        contract: &ExtractionContract,
    ) -> Result<ExtractionFragment> {
        let request = self.request(system_prompt, user_prompt, contract);
        retry_request(self.max_retries, || self.send(&request)).await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            base_url: "http://localhost:11434/".to_string(),
            model: "llama3.1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_uses_contract_schema_as_format() {
        let generator = OllamaGenerator::new(&config()).unwrap();
        let contract = ExtractionContract {
            name: "f".to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object", "properties": {"title": {"type": "string"}}}),
        };

        let body = serde_json::to_value(generator.request("sys", "user", &contract)).unwrap();
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"]["properties"]["title"]["type"], "string");
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(generator.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_parse_content() {
        let chat: ChatResponse = serde_json::from_value(json!({
            "model": "llama3.1",
            "message": { "role": "assistant", "content": "{\"title\": \"Most\"}" },
            "done": true
        }))
        .unwrap();
        let fragment = parse_content(&chat).unwrap();
        assert_eq!(fragment.get("title"), Some(&json!("Most")));
    }

    #[test]
    fn test_empty_content_is_decode_error() {
        let chat: ChatResponse =
            serde_json::from_value(json!({ "message": { "role": "assistant", "content": "" } }))
                .unwrap();
        assert!(matches!(parse_content(&chat), Err(Error::Decode(_))));
    }
}
