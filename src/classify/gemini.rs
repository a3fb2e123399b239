//! Gemini `generateContent` over blocking HTTP.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use ureq::Agent;

use super::{GenerationSettings, InferenceService};
use crate::config::InferenceConfig;
use crate::error::InferenceError;

/// Client for the Generative Language REST API.
pub struct GeminiClient {
    agent: Agent,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

impl InferenceService for GeminiClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/{}:generateContent", self.endpoint, model);
        let request = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": settings.temperature,
                "topP": settings.top_p,
                "topK": settings.top_k,
                "maxOutputTokens": settings.max_output_tokens,
                "responseMimeType": "application/json",
            }
        });

        let mut response = self
            .agent
            .post(&url)
            .query("key", &self.api_key)
            .header("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| InferenceError::Transient(format!("request to {model} failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| InferenceError::Transient(format!("reading response failed: {e}")))?;
        debug!(model, status, bytes = body.len(), "Inference response");

        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &body));
        }
        candidate_text(&body)
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Concatenated text of the first candidate.
fn candidate_text(body: &str) -> Result<String, InferenceError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::Invalid(format!("unreadable response: {e}")))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(InferenceError::Invalid("response has no candidate text".to_string()));
    }
    Ok(text)
}

/// Map a non-success HTTP answer onto the typed error kinds.
pub fn error_for_status(status: u16, body: &str) -> InferenceError {
    let detail = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
    let lower = body.to_lowercase();
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") || lower.contains("quota") {
        InferenceError::RateLimited(detail)
    } else if status >= 500 {
        InferenceError::Transient(detail)
    } else {
        InferenceError::Permanent(detail)
    }
}
