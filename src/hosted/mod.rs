//! Generation delegated to a hosted model provider.

mod gemini;

use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::error::ServiceError;

pub use gemini::GeminiClient;

/// Hosted models this service is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostedModel {
    #[default]
    Gemini25Flash,
    Gemini25Pro,
}

impl HostedModel {
    pub const ALL: [HostedModel; 2] = [HostedModel::Gemini25Flash, HostedModel::Gemini25Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostedModel::Gemini25Flash => "gemini-2.5-flash",
            HostedModel::Gemini25Pro => "gemini-2.5-pro",
        }
    }

    pub fn supported() -> Vec<&'static str> {
        Self::ALL.iter().map(HostedModel::as_str).collect()
    }
}

impl FromStr for HostedModel {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == wanted)
            .ok_or_else(|| ServiceError::UnsupportedModel {
                requested: wanted.to_string(),
                supported: Self::supported(),
            })
    }
}

impl fmt::Display for HostedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HostedPrompt {
    pub model: HostedModel,
    pub prompt: String,
    pub media_urls: Vec<String>,
}

#[async_trait]
pub trait HostedGenerator: Send + Sync {
    async fn generate(&self, request: &HostedPrompt) -> Result<String, ServiceError>;
}

/// Best-effort MIME type for a media reference, judged by its extension.
pub fn mime_type_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let ext = match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
