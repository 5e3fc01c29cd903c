use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{HealthResponse, utc_timestamp};
use crate::{
    config::HostedConfig,
    error::ServiceError,
    hosted::{GeminiClient, HostedGenerator, HostedModel, HostedPrompt},
    model::validate_prompt,
};

const MEDIA_SCHEMES: [&str; 3] = ["http", "https", "gs"];

#[derive(Clone)]
pub struct HostedState {
    pub service: String,
    pub default_model: HostedModel,
    pub generator: Arc<dyn HostedGenerator>,
}

#[derive(Debug, Deserialize)]
pub struct HostedGenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostedGenerateResponse {
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: String,
    timestamp: String,
}

pub fn gemini_router(state: HostedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

impl HostedState {
    pub fn from_config(config: &HostedConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            service: config.service_name.clone(),
            default_model: config.default_model,
            generator: Arc::new(GeminiClient::new(config)?),
        })
    }
}

pub async fn run_hosted() -> anyhow::Result<()> {
    let config = HostedConfig::from_env()?;
    info!(
        service = %config.service_name,
        default_model = %config.default_model,
        api_base = %config.api_base,
        "starting hosted generation service"
    );
    let state = HostedState::from_config(&config)?;
    super::serve(config.listen_addr, gemini_router(state)).await
}

async fn root(State(state): State<HostedState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: format!("{} is running", state.service),
        timestamp: utc_timestamp(),
    })
}

async fn health(State(state): State<HostedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        service: state.service.clone(),
        model: state.default_model.to_string(),
        loaded: None,
        time: utc_timestamp(),
    })
}

async fn generate(
    State(state): State<HostedState>,
    Json(request): Json<HostedGenerateRequest>,
) -> Result<Json<HostedGenerateResponse>, ServiceError> {
    let model = match request.model.as_deref() {
        Some(raw) => raw.parse::<HostedModel>()?,
        None => state.default_model,
    };
    validate_prompt(&request.prompt)?;
    validate_media_urls(&request.media_urls)?;

    info!(
        %model,
        prompt_len = request.prompt.len(),
        media = request.media_urls.len(),
        "received hosted generation request"
    );

    let prompt = HostedPrompt {
        model,
        prompt: request.prompt,
        media_urls: request.media_urls,
    };
    let response = state.generator.generate(&prompt).await?;

    Ok(Json(HostedGenerateResponse {
        model: model.to_string(),
        prompt: prompt.prompt,
        response,
        timestamp: utc_timestamp(),
    }))
}

fn validate_media_urls(urls: &[String]) -> Result<(), ServiceError> {
    for raw in urls {
        let url = Url::parse(raw)
            .map_err(|e| ServiceError::BadRequest(format!("invalid media url '{raw}': {e}")))?;
        if !MEDIA_SCHEMES.contains(&url.scheme()) {
            return Err(ServiceError::BadRequest(format!(
                "media url '{raw}' must use one of: {}",
                MEDIA_SCHEMES.join(", ")
            )));
        }
    }
    Ok(())
}
