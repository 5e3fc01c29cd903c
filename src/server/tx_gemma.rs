use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::{LocalState, local_health, unix_seconds};
use crate::{
    error::ServiceError,
    model::{ChatMessage, Completion, SamplingOverrides, validate_messages, validate_prompt},
};

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: SamplingOverrides,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub sampling: SamplingOverrides,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub model: String,
    /// Unix seconds at completion.
    pub created: i64,
    pub text: String,
}

pub fn tx_gemma_router(state: LocalState) -> Router {
    Router::new()
        .route("/health", get(local_health))
        .route("/v1/generate", post(generate))
        .route("/v1/chat", post(chat))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn generate(
    State(state): State<LocalState>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<TextResponse>, ServiceError> {
    validate_prompt(&request.prompt)?;
    let params = state.sampling_params(&request.sampling)?;
    info!(
        prompt_len = request.prompt.len(),
        max_new_tokens = params.max_new_tokens,
        "received generation request"
    );

    let prompt = request.prompt;
    let completion = state
        .cache
        .run(move |ctx| ctx.generate(&prompt, &params))
        .await?;
    log_completion(&completion);

    Ok(Json(TextResponse {
        model: state.model_id.clone(),
        created: unix_seconds(),
        text: completion.text,
    }))
}

async fn chat(
    State(state): State<LocalState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TextResponse>, ServiceError> {
    validate_messages(&request.messages)?;
    let params = state.sampling_params(&request.sampling)?;
    info!(
        messages = request.messages.len(),
        max_new_tokens = params.max_new_tokens,
        "received chat request"
    );

    let messages = request.messages;
    let completion = state
        .cache
        .run(move |ctx| ctx.chat(&messages, &params))
        .await?;
    log_completion(&completion);

    Ok(Json(TextResponse {
        model: state.model_id.clone(),
        created: unix_seconds(),
        text: completion.reply,
    }))
}

fn log_completion(completion: &Completion) {
    info!(
        prompt_tokens = completion.prompt_tokens,
        tokens = completion.tokens_generated(),
        finish = ?completion.finish_reason,
        elapsed_ms = completion.elapsed.as_millis() as u64,
        "generation complete"
    );
}
