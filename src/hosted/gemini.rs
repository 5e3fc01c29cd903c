//! Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{HostedGenerator, HostedPrompt, mime_type_for};
use crate::{config::HostedConfig, error::ServiceError};

pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &HostedConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn api_url(&self, request: &HostedPrompt) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base,
            request.model.as_str()
        )
    }
}

#[async_trait]
impl HostedGenerator for GeminiClient {
    async fn generate(&self, request: &HostedPrompt) -> Result<String, ServiceError> {
        let body = build_request(request);

        tracing::debug!(
            model = %request.model,
            prompt_len = request.prompt.len(),
            media = request.media_urls.len(),
            "sending request to Gemini API"
        );

        let response = self
            .client
            .post(self.api_url(request))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream(format!(
                "Gemini API error {status}: {detail}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("failed to parse response: {e}")))?;

        Ok(extract_text(&payload).unwrap_or_else(|| payload.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    FileData { file_data: FileData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: &'static str,
    file_uri: String,
}

fn build_request(request: &HostedPrompt) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(request.media_urls.len() + 1);
    parts.push(Part::Text {
        text: request.prompt.clone(),
    });
    parts.extend(request.media_urls.iter().map(|url| Part::FileData {
        file_data: FileData {
            mime_type: mime_type_for(url),
            file_uri: url.clone(),
        },
    }));

    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
    }
}

/// Concatenated text parts of the first candidate, if it has any.
fn extract_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::hosted::HostedModel;

    #[test]
    fn media_urls_become_file_parts_after_the_prompt() {
        let request = HostedPrompt {
            model: HostedModel::Gemini25Pro,
            prompt: "Describe the lesion".into(),
            media_urls: vec!["https://cdn.example.org/derm/lesion.jpg".into()],
        };
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "Describe the lesion" },
                        { "fileData": {
                            "mimeType": "image/jpeg",
                            "fileUri": "https://cdn.example.org/derm/lesion.jpg"
                        }}
                    ]
                }]
            })
        );
    }

    #[test]
    fn text_parts_are_joined() {
        let payload = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Type 2 " }, { "text": "diabetes." }] },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_text(&payload).as_deref(), Some("Type 2 diabetes."));
    }

    #[test]
    fn missing_text_has_no_extraction() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert_eq!(extract_text(&blocked), None);
        let empty = json!({ "candidates": [{ "content": { "parts": [{ "inlineData": {} }] } }] });
        assert_eq!(extract_text(&empty), None);
    }
}
