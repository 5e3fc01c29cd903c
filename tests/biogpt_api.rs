mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use medgen_services::{
    InferenceContext, LocalState, ServiceError, biogpt_router, config::BIOGPT,
    server::prepare_cache,
};
use serde_json::json;

use common::{BigramLm, FailingLm, config_with, local_state, send, tokenizer};

fn diabetes_lm() -> Arc<BigramLm> {
    BigramLm::new(
        &[
            ("diabetes", "is"),
            ("is", "a"),
            ("a", "chronic"),
            ("chronic", "metabolic"),
            ("metabolic", "disease"),
        ],
        "</s>",
    )
}

#[tokio::test]
async fn generate_returns_model_prompt_text_and_timestamp() {
    let lm = diabetes_lm();
    let router = biogpt_router(local_state(&BIOGPT, lm.clone()));
    let received = Utc::now();

    let (status, body) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes", "max_tokens": 32 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["model"], "microsoft/BioGPT-Large");
    assert_eq!(body["prompt"], "Explain diabetes");
    assert_eq!(
        body["response"],
        "Explain diabetes is a chronic metabolic disease"
    );

    let stamp = body["timestamp"].as_str().unwrap();
    assert!(stamp.ends_with('Z'));
    let stamp = DateTime::parse_from_rfc3339(stamp).unwrap();
    assert!(stamp.timestamp_micros() >= received.timestamp_micros());

    // five words, then the end-of-sequence token
    assert_eq!(lm.calls(), 6);
}

#[tokio::test]
async fn response_never_exceeds_prompt_plus_budget() {
    let lm = BigramLm::new(
        &[
            ("diabetes", "insulin"),
            ("insulin", "glucose"),
            ("glucose", "insulin"),
        ],
        "insulin",
    );
    let router = biogpt_router(local_state(&BIOGPT, lm.clone()));

    let (status, body) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes", "max_tokens": 5, "temperature": 0.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().unwrap();
    assert!(!response.is_empty());
    let tokenizer = tokenizer();
    let prompt_len = tokenizer.encode("Explain diabetes", true).unwrap().len();
    let response_len = tokenizer.encode(response, true).unwrap().len();
    assert_eq!(response_len, prompt_len + 5);
    assert_eq!(lm.calls(), 5);
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_generation() {
    let lm = diabetes_lm();
    let router = biogpt_router(local_state(&BIOGPT, lm.clone()));

    let (status, body) = send(&router, "POST", "/generate", Some(json!({ "prompt": "  " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("prompt"));
    assert_eq!(lm.calls(), 0);
}

#[tokio::test]
async fn out_of_range_sampling_is_a_client_error() {
    let lm = diabetes_lm();
    let router = biogpt_router(local_state(&BIOGPT, lm.clone()));

    for body in [
        json!({ "prompt": "Explain diabetes", "temperature": -1.0 }),
        json!({ "prompt": "Explain diabetes", "top_p": 0.0 }),
        json!({ "prompt": "Explain diabetes", "max_tokens": 0 }),
        json!({ "prompt": "Explain diabetes", "max_tokens": 100000 }),
    ] {
        let (status, _) = send(&router, "POST", "/generate", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(lm.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let router = biogpt_router(local_state(&BIOGPT, diabetes_lm()));

    let (status, _) = send(&router, "POST", "/generate", Some(json!({ "max_tokens": 8 }))).await;
    assert!(status.is_client_error(), "{status}");

    let (status, _) = send(&router, "POST", "/generate", Some(json!({ "prompt": 42 }))).await;
    assert!(status.is_client_error(), "{status}");
}

#[tokio::test]
async fn inference_failure_surfaces_as_server_error_with_message() {
    let router = biogpt_router(local_state(&BIOGPT, Arc::new(FailingLm("CUDA out of memory"))));

    let (status, body) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("CUDA out of memory"));
}

#[tokio::test]
async fn health_reports_lazy_load_state() {
    let state = local_state(&BIOGPT, diabetes_lm());
    let cache = state.cache.clone();
    let router = biogpt_router(state);

    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "biogpt-api");
    assert_eq!(body["model"], "microsoft/BioGPT-Large");
    assert_eq!(body["loaded"], false);
    assert!(body["time"].as_str().unwrap().ends_with('Z'));

    let (status, _) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(body["loaded"], true);
    assert_eq!(cache.load_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_loaded_model() {
    let state = local_state(&BIOGPT, diabetes_lm());
    let cache = state.cache.clone();
    let router = biogpt_router(state);

    let requests = (0..8).map(|_| {
        let router = router.clone();
        tokio::spawn(async move {
            send(
                &router,
                "POST",
                "/generate",
                Some(json!({ "prompt": "Explain diabetes", "max_tokens": 8 })),
            )
            .await
        })
    });
    for handle in requests.collect::<Vec<_>>() {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "microsoft/BioGPT-Large");
    }

    assert_eq!(cache.load_count(), 1);
}

#[tokio::test]
async fn lazy_load_failure_answers_service_unavailable() {
    let config = config_with(&BIOGPT, &[("MODEL_LOAD", "lazy")]);
    let cache = prepare_cache(&config, || {
        Err(ServiceError::ModelUnavailable(
            "model artifact missing: models/biogpt_large.ts".into(),
        ))
    })
    .unwrap();
    let router = biogpt_router(LocalState::new(&config, cache.clone()));

    let (status, body) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes" })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("model artifact missing: models/biogpt_large.ts"),
        "{body}"
    );
    assert!(!cache.is_loaded());
}

#[tokio::test]
async fn eager_policy_serves_an_already_loaded_model() {
    let config = config_with(&BIOGPT, &[("MODEL_LOAD", "eager")]);
    let lm = diabetes_lm();
    let loader_lm = lm.clone();
    let loader_config = config.clone();
    let cache = prepare_cache(&config, move || {
        Ok(InferenceContext::new(
            loader_config.model_id.clone(),
            "cpu",
            tokenizer(),
            loader_lm.clone(),
            loader_config.template,
            &loader_config.eos_tokens,
        ))
    })
    .unwrap();
    assert_eq!(cache.load_count(), 1);

    let router = biogpt_router(LocalState::new(&config, cache.clone()));
    let (_, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(body["loaded"], true);

    let (status, _) = send(
        &router,
        "POST",
        "/generate",
        Some(json!({ "prompt": "Explain diabetes" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.load_count(), 1);
}
