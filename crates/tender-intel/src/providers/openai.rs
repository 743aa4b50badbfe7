//! OpenAI-compatible chat completions with a forced function call

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::extraction::accumulate::ExtractionFragment;
use crate::extraction::schema::ExtractionContract;

use super::generator::{retry_request, StructuredGenerator};

/// Chat completions client that forces the contract as a tool call
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    /// Sent as `null` by some servers next to a legacy `function_call`
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    /// Older servers answer with a bare function call
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        if config.api_key.is_none() {
            tracing::warn!("No API key configured for {}", config.base_url);
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, contract: &ExtractionContract) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "tools": [{ "type": "function", "function": contract }],
            "tool_choice": { "type": "function", "function": { "name": contract.name } },
        })
    }

    async fn send(&self, body: &Value, contract_name: &str) -> Result<ExtractionFragment> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::llm(format!("Chat completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!(
                "Chat completion failed: HTTP {}: {}",
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("Failed to parse chat completion: {}", e)))?;

        parse_function_arguments(chat, contract_name)
    }
}

fn parse_function_arguments(chat: ChatResponse, contract_name: &str) -> Result<ExtractionFragment> {
    let message = chat
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| Error::decode("Chat completion has no choices"))?;

    let call = message
        .tool_calls
        .into_iter()
        .flatten()
        .map(|t| t.function)
        .next()
        .or(message.function_call)
        .ok_or_else(|| Error::decode("Reply did not call the extraction function"))?;

    if call.name != contract_name {
        tracing::warn!("Reply called {} instead of {}", call.name, contract_name);
    }
    ExtractionFragment::from_json_str(&call.arguments)
}

#[async_trait]
impl StructuredGenerator for OpenAiGenerator {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        contract: &ExtractionContract,
    ) -> Result<ExtractionFragment> {
        let body = self.request_body(system_prompt, user_prompt, contract);
        retry_request(self.max_retries, || self.send(&body, &contract.name)).await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
