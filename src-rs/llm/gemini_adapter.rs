use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};

use super::rotation::Rotator;
use super::types::{CompletionRequest, LLMResponse, Message, ProviderAdapter, ProviderError, SafetyRating};
use crate::error::AgentError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

pub struct GeminiAdapter {
    cfg: GeminiConfig,
    rotator: Rotator,
    client: Client,
}

impl GeminiAdapter {
    pub fn new(mut cfg: GeminiConfig) -> Result<Self, AgentError> {
        if cfg.api_keys.is_empty() {
            return Err(AgentError::MissingCredential);
        }
        if cfg.base_url.is_empty() {
            cfg.base_url = DEFAULT_BASE_URL.to_string();
        }
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            rotator: Rotator::new(cfg.api_keys.clone()),
            cfg,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn complete(&self, request: CompletionRequest) -> Result<LLMResponse, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.cfg.model.clone());
        let temperature = request.temperature.unwrap_or(self.cfg.temperature);
        let payload = build_payload(&request.messages, temperature, &self.cfg);

        let tries = self.rotator.len();
        let mut last_err = None;
        for _ in 0..tries {
            let key = match self.rotator.next() {
                Some(key) => key,
                None => break,
            };
            match send_request(&self.client, &self.cfg.base_url, &model, &key, &payload) {
                Ok(resp) => return Ok(resp),
                // Only auth and quota failures are worth another key.
                Err(err) if err.code == "auth_error" || err.code == "rate_limit" => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        match last_err {
            // Every key was rejected; retrying the same keys will not help.
            Some(mut err) if err.code == "auth_error" => {
                err.retryable = false;
                Err(err)
            }
            Some(err) => Err(err),
            None => Err(ProviderError::new("api_error", "request failed", true)),
        }
    }
}

fn build_payload(messages: &[Message], temperature: f64, cfg: &GeminiConfig) -> Value {
    let mut contents = Vec::new();
    let mut system_instruction = None;

    for msg in messages {
        if msg.role == "system" {
            system_instruction = Some(msg.content.clone());
            continue;
        }
        let role = if msg.role == "user" { "user" } else { "model" };
        contents.push(json!({
            "role": role,
            "parts": [{"text": msg.content}]
        }));
    }

    let mut payload = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": temperature,
            "topP": cfg.top_p,
            "topK": cfg.top_k,
            "maxOutputTokens": cfg.max_output_tokens,
        }
    });

    if let Some(system) = system_instruction {
        payload["systemInstruction"] = json!({
            "parts": [{"text": system}]
        });
    }

    payload
}

fn send_request(
    client: &Client,
    base_url: &str,
    model: &str,
    api_key: &str,
    payload: &Value,
) -> Result<LLMResponse, ProviderError> {
    let endpoint = format!(
        "{}/v1beta/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model
    );
    let resp = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .header("x-goog-api-key", api_key)
        .json(payload)
        .send()
        .map_err(|err| ProviderError::new("network_error", &err.to_string(), true))?;

    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if status.is_client_error() || status.is_server_error() {
        return Err(classify_failure(status.as_u16(), &body));
    }

    let raw: Value = serde_json::from_str(&body)
        .map_err(|_| ProviderError::new("parse_error", "invalid json", false))?;
    Ok(parse_response(raw))
}

fn classify_failure(status: u16, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    if status == 401 || status == 403 {
        return ProviderError::new("auth_error", body, true);
    }
    if status == 429 || lowered.contains("quota") || lowered.contains("resource_exhausted") {
        return ProviderError::new("rate_limit", body, true);
    }
    if status >= 500 {
        return ProviderError::new("server_error", body, true);
    }
    ProviderError::new("api_error", body, false)
}

fn parse_response(raw: Value) -> LLMResponse {
    let mut content = String::new();
    let mut finish_reason = None;
    let mut safety_ratings = Vec::new();

    let first = raw
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first());

    if let Some(candidate) = first {
        finish_reason = candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|v| v.as_array())
        {
            for part in parts {
                if let Some(chunk) = part.get("text").and_then(|v| v.as_str()) {
                    content.push_str(chunk);
                }
            }
        }

        if let Some(ratings) = candidate.get("safetyRatings").and_then(|v| v.as_array()) {
            for rating in ratings {
                let category = rating.get("category").and_then(|v| v.as_str()).unwrap_or("");
                let probability = rating.get("probability").and_then(|v| v.as_str()).unwrap_or("");
                safety_ratings.push(SafetyRating {
                    category: category.to_string(),
                    probability: probability.to_string(),
                });
            }
        }
    }

    LLMResponse {
        content,
        finish_reason,
        safety_ratings,
        raw: Some(raw),
    }
}
