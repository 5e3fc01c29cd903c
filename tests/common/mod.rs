#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use medgen_services::{
    ServiceError,
    config::{LocalModelConfig, ModelProfile},
    model::{CausalLm, InferenceContext, ModelCache},
    server::LocalState,
};
use serde_json::Value;
use tokenizers::Tokenizer;
use tower::ServiceExt;

pub const TOKENIZER_FIXTURE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/tokenizer.json"
);

pub fn tokenizer() -> Tokenizer {
    Tokenizer::from_file(TOKENIZER_FIXTURE).expect("fixture tokenizer loads")
}

pub fn id(token: &str) -> u32 {
    tokenizer()
        .token_to_id(token)
        .unwrap_or_else(|| panic!("{token} missing from fixture vocab"))
}

/// Picks the next token from the last one through a fixed table, falling back
/// to `fallback`. Every other logit is masked, so sampling is deterministic.
pub struct BigramLm {
    table: HashMap<u32, u32>,
    fallback: u32,
    vocab: usize,
    calls: AtomicUsize,
}

impl BigramLm {
    pub fn new(pairs: &[(&str, &str)], fallback: &str) -> Arc<Self> {
        let tokenizer = tokenizer();
        let lookup = |t: &str| tokenizer.token_to_id(t).expect("token in fixture vocab");
        Arc::new(Self {
            table: pairs.iter().map(|(a, b)| (lookup(a), lookup(b))).collect(),
            fallback: lookup(fallback),
            vocab: tokenizer.get_vocab_size(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CausalLm for BigramLm {
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last = *input_ids.last().expect("non-empty input");
        let next = self.table.get(&last).copied().unwrap_or(self.fallback);
        let mut logits = vec![f32::NEG_INFINITY; self.vocab];
        logits[next as usize] = 0.0;
        Ok(logits)
    }
}

pub struct FailingLm(pub &'static str);

impl CausalLm for FailingLm {
    fn next_token_logits(&self, _input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
        Err(ServiceError::Inference(self.0.to_string()))
    }
}

/// Profile defaults with the fixture tokenizer and any `overrides` applied.
pub fn config_with(profile: &ModelProfile, overrides: &[(&str, &str)]) -> LocalModelConfig {
    LocalModelConfig::from_lookup(profile, |key| {
        overrides
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .or_else(|| (key == "TOKENIZER_PATH").then(|| TOKENIZER_FIXTURE.to_string()))
    })
    .expect("test config is valid")
}

pub fn config(profile: &ModelProfile) -> LocalModelConfig {
    config_with(profile, &[])
}

/// Router state whose cache builds a context around `lm` on first use.
pub fn local_state(profile: &ModelProfile, lm: Arc<dyn CausalLm>) -> LocalState {
    let config = config(profile);
    let loader_config = config.clone();
    let cache = ModelCache::new(move || {
        Ok(InferenceContext::new(
            loader_config.model_id.clone(),
            "cpu",
            tokenizer(),
            Arc::clone(&lm),
            loader_config.template,
            &loader_config.eos_tokens,
        ))
    });
    LocalState::new(&config, Arc::new(cache))
}

pub async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
