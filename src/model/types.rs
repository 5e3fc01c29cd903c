use std::time::Duration;

use serde::Deserialize;

use crate::{config::SamplingDefaults, error::ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-request sampling fields; anything unset falls back to the service defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SamplingOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub max_new_tokens: Option<usize>,
    pub seed: Option<u64>,
}

impl SamplingOverrides {
    pub fn resolve(&self, defaults: &SamplingDefaults) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            max_new_tokens: self.max_new_tokens.unwrap_or(defaults.max_new_tokens),
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Zero selects greedy decoding.
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub max_new_tokens: usize,
    pub seed: Option<u64>,
}

impl SamplingParams {
    pub fn validate(&self, max_new_tokens_limit: usize) -> Result<(), ServiceError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ServiceError::BadRequest(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ServiceError::BadRequest(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_new_tokens == 0 || self.max_new_tokens > max_new_tokens_limit {
            return Err(ServiceError::BadRequest(format!(
                "max new tokens must be between 1 and {max_new_tokens_limit}, got {}",
                self.max_new_tokens
            )));
        }
        Ok(())
    }
}

pub fn validate_prompt(prompt: &str) -> Result<(), ServiceError> {
    if prompt.trim().is_empty() {
        return Err(ServiceError::BadRequest("prompt must not be empty".into()));
    }
    Ok(())
}

pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), ServiceError> {
    let Some(last) = messages.last() else {
        return Err(ServiceError::BadRequest("messages must not be empty".into()));
    };
    for (idx, message) in messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(ServiceError::BadRequest(format!(
                "message {idx} has empty content"
            )));
        }
        if message.role == Role::System && idx != 0 {
            return Err(ServiceError::BadRequest(format!(
                "system message only allowed first, found at index {idx}"
            )));
        }
    }
    if last.role != Role::User {
        return Err(ServiceError::BadRequest(
            "last message must come from the user".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub prompt_tokens: usize,
    pub generated_ids: Vec<u32>,
    pub text: String,
    /// Decoded from the ids past the prompt only.
    pub reply: String,
    pub finish_reason: FinishReason,
    pub elapsed: Duration,
}

impl Completion {
    pub fn tokens_generated(&self) -> usize {
        self.generated_ids.len()
    }
}
