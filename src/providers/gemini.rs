// Gemini API provider implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::retry::{with_retry, RetryPolicy};
use super::types::{ChatRole, FunctionCall, GenerateRequest, LlmReply, ProviderError};
use super::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini `generateContent` provider
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(llm: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        if !llm.has_api_key() {
            return Err(ProviderError::MissingApiKey.into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        // The LLM section carries its own retry count and base delay
        let retry = RetryPolicy {
            max_retries: llm.max_retries,
            base_delay: Duration::from_millis(llm.retry_delay_ms),
            ..RetryPolicy::from_config(retry)
        };

        Ok(Self {
            client,
            api_key: llm.api_key.clone(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            top_p: llm.top_p,
            top_k: llm.top_k,
            retry,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// Build the `generateContent` request body
    pub fn request_body(&self, request: &GenerateRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature.unwrap_or(self.temperature),
                "topP": self.top_p,
                "topK": self.top_k,
                "maxOutputTokens": request.max_tokens.unwrap_or(self.max_tokens),
            },
            "safetySettings": SAFETY_CATEGORIES
                .iter()
                .map(|c| json!({"category": c, "threshold": "BLOCK_NONE"}))
                .collect::<Vec<_>>(),
        });

        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools.clone();
        }
        body
    }

    /// Send a single request (no retry)
    async fn generate_once(&self, request: &GenerateRequest) -> Result<LlmReply> {
        let body = self.request_body(request);
        tracing::debug!(model = %self.model, messages = request.messages.len(), "Sending Gemini request");

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;
        parse_response(&payload)
    }
}

/// Pull text, the first function call and the finish reason out of
/// `candidates[0]`
pub fn parse_response(payload: &Value) -> Result<LlmReply> {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::InvalidResponse("no candidates".to_string()))?;

    let mut text = String::new();
    let mut function_call = None;
    if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
            if function_call.is_none() {
                if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    if !name.is_empty() {
                        function_call = Some(FunctionCall {
                            name: name.to_string(),
                            args: call.get("args").cloned().unwrap_or_else(|| json!({})),
                        });
                    }
                }
            }
        }
    }

    Ok(LlmReply {
        text: if text.trim().is_empty() { None } else { Some(text) },
        function_call,
        finish_reason: candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<LlmReply> {
        with_retry(&self.retry, || self.generate_once(request)).await
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
