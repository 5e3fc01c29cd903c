mod biogpt;
mod gemini;
mod tx_gemma;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{Json, Router, extract::State};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::{
    config::{LoadPolicy, LocalModelConfig, SamplingDefaults},
    error::ServiceError,
    model::{InferenceContext, ModelCache, SamplingOverrides, SamplingParams},
    telemetry,
};

pub use biogpt::{BioGptRequest, BioGptResponse, biogpt_router};
pub use gemini::{
    HostedGenerateRequest, HostedGenerateResponse, HostedState, gemini_router, run_hosted,
};
pub use tx_gemma::{ChatRequest, PromptRequest, TextResponse, tx_gemma_router};

#[derive(Clone)]
pub struct LocalState {
    pub service: String,
    pub model_id: String,
    pub cache: Arc<ModelCache>,
    pub sampling: SamplingDefaults,
    pub max_new_tokens_limit: usize,
}

impl LocalState {
    pub fn new(config: &LocalModelConfig, cache: Arc<ModelCache>) -> Self {
        Self {
            service: config.service_name.clone(),
            model_id: config.model_id.clone(),
            cache,
            sampling: config.sampling,
            max_new_tokens_limit: config.max_new_tokens_limit,
        }
    }

    fn sampling_params(&self, overrides: &SamplingOverrides) -> Result<SamplingParams, ServiceError> {
        let params = overrides.resolve(&self.sampling);
        params.validate(self.max_new_tokens_limit)?;
        Ok(params)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<bool>,
    pub time: String,
}

async fn local_health(State(state): State<LocalState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        service: state.service.clone(),
        model: state.model_id.clone(),
        loaded: Some(state.cache.is_loaded()),
        time: utc_timestamp(),
    })
}

/// Current UTC time as ISO-8601 with a `Z` suffix.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}

pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    Ok(())
}

/// Wraps `loader` in a cache. Under the eager policy the model is loaded here,
/// and a failure is returned before any router exists.
pub fn prepare_cache<F>(config: &LocalModelConfig, loader: F) -> anyhow::Result<Arc<ModelCache>>
where
    F: Fn() -> Result<InferenceContext, ServiceError> + Send + Sync + 'static,
{
    let cache = Arc::new(ModelCache::new(loader));
    if config.load_policy == LoadPolicy::Eager {
        cache
            .get()
            .with_context(|| format!("failed to load model {}", config.model_id))?;
    }
    Ok(cache)
}

#[cfg(feature = "tch-backend")]
pub async fn run_local(
    profile: &crate::config::ModelProfile,
    router: fn(LocalState) -> Router,
) -> anyhow::Result<()> {
    use crate::model::load_context;

    let config = LocalModelConfig::from_env(profile)?;
    tracing::info!(
        service = %config.service_name,
        model = %config.model_id,
        device = %config.device,
        load = ?config.load_policy,
        "starting local model service"
    );

    let loader_config = config.clone();
    let cache = prepare_cache(&config, move || load_context(&loader_config))?;

    let state = LocalState::new(&config, cache);
    serve(config.listen_addr, router(state)).await
}
