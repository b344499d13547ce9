//! Cohere generate endpoint client

use super::types::{LlmRequest, LlmResponse};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "2022-12-06";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for a Cohere-style `/generate` endpoint
pub struct CohereService {
    client: Client,
    api_key: String,
    endpoint: String,
    model_id: String,
}

impl CohereService {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model_id: model_id.into(),
        })
    }

    fn translate_request(request: &LlmRequest) -> GenerateRequest<'_> {
        let settings = &request.settings;
        GenerateRequest {
            model: &settings.model,
            prompt: &request.prompt,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            stop_sequences: &settings.stop_sequences,
        }
    }
}

/// Turn a 2xx body into a response, requiring `generations[0].text`
pub(crate) fn parse_response(body: &str) -> Result<LlmResponse, LlmError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::malformed_response(format!("Failed to parse response: {e}")))?;

    parsed
        .generations
        .into_iter()
        .next()
        .map(|g| LlmResponse { text: g.text })
        .ok_or_else(|| LlmError::malformed_response("Response contained no generations"))
}

pub(crate) fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string());

    match status.as_u16() {
        401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
        429 => LlmError::rate_limit(format!("Rate limited: {message}")),
        400 | 422 => LlmError::invalid_request(format!("Invalid request: {message}")),
        500..=599 => LlmError::server_error(format!("Server error: {message}")),
        _ => LlmError::unknown(format!("HTTP {status}: {message}")),
    }
}

#[async_trait]
impl LlmService for CohereService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = Self::translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Cohere-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        parse_response(&body)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Cohere API types

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    stop_sequences: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generations: Vec<Generation>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
