use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{LocalState, local_health, utc_timestamp};
use crate::{
    error::ServiceError,
    model::{SamplingOverrides, validate_prompt},
};

#[derive(Debug, Deserialize)]
pub struct BioGptRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BioGptResponse {
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: String,
}

pub fn biogpt_router(state: LocalState) -> Router {
    Router::new()
        .route("/health", get(local_health))
        .route("/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn generate(
    State(state): State<LocalState>,
    Json(request): Json<BioGptRequest>,
) -> Result<Json<BioGptResponse>, ServiceError> {
    validate_prompt(&request.prompt)?;
    let params = state.sampling_params(&SamplingOverrides {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_new_tokens: request.max_tokens,
        seed: request.seed,
    })?;

    info!(
        prompt_len = request.prompt.len(),
        max_new_tokens = params.max_new_tokens,
        "received generation request"
    );

    let prompt = request.prompt.clone();
    let completion = state
        .cache
        .run(move |ctx| ctx.generate(&prompt, &params))
        .await?;
    info!(
        prompt_tokens = completion.prompt_tokens,
        tokens = completion.tokens_generated(),
        finish = ?completion.finish_reason,
        elapsed_ms = completion.elapsed.as_millis() as u64,
        "generation complete"
    );

    Ok(Json(BioGptResponse {
        model: state.model_id.clone(),
        prompt: request.prompt,
        response: completion.text,
        timestamp: utc_timestamp(),
    }))
}
