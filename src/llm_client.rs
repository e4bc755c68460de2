//! Transport to the LLM. The turn loop needs exactly one request/response
//! call per turn — no streaming, no tool-calling declarations — so this
//! is a single `complete` method instead of the richer multi-turn
//! transport a chat agent would need.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error: {0}")]
    ApiError(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_instruction: &str, prompt: &str) -> Result<String, LlmError>;
}

// --- Gemini Implementation ---

pub struct GeminiClient {
    api_key: String,
    client: Client,
    model_name: String,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiContent {
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    system_instruction: Option<GeminiContent>,
}

impl GeminiClient {
    pub fn new(api_key: String, model_name: Option<String>) -> Self {
        Self {
            api_key,
            client: Client::new(),
            model_name: model_name.unwrap_or_else(|| "gemini-3.1-pro-preview".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, system_instruction: &str, prompt: &str) -> Result<String, LlmError> {
        let req_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
            system_instruction: if system_instruction.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart { text: system_instruction.to_string() }],
                })
            },
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model_name, self.api_key
        );

        tracing::debug!(
            "Gemini request: url={}, body_len={}",
            url,
            serde_json::to_string(&req_body).map(|s| s.len()).unwrap_or(0)
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&req_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(response.text().await?));
        }

        let resp_json: Value = response.json().await?;
        let text = resp_json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();
        Ok(text)
    }
}

// --- OpenAI-compatible Implementation ---

pub struct OpenAiCompatClient {
    api_key: String,
    base_url: String,
    model_name: String,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(api_key: String, base_url: String, model_name: String) -> Self {
        Self {
            api_key,
            base_url,
            model_name,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, system_instruction: &str, prompt: &str) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if !system_instruction.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system_instruction,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt,
        }));

        let body = serde_json::json!({
            "model": self.model_name,
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.base_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(response.text().await?));
        }

        let resp_json: Value = response.json().await?;
        let text = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_client_defaults_model_when_none_given() {
        let client = GeminiClient::new("key".to_string(), None);
        assert_eq!(client.model_name, "gemini-3.1-pro-preview");
    }
}
