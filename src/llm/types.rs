//! Common types for LLM interactions

use crate::config::{LlmConfig, TURN_STOP_SEQUENCE};

/// Fixed generation parameters applied to every request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl GenerationSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: vec![TURN_STOP_SEQUENCE.to_string()],
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub settings: GenerationSettings,
}

/// LLM response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    /// Generated text exactly as returned, untrimmed
    pub text: String,
}

impl LlmResponse {
    pub fn text(s: impl Into<String>) -> Self {
        Self { text: s.into() }
    }
}
