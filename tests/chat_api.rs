use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use guideme_gateway::{
    backend::{
        mock::{MockBackend, MockBehavior},
        BackendError, Capability, InferenceBackend, ProviderErrorKind,
    },
    build_app, build_state,
    config::GatewayConfig,
    gateway::{CompletionGateway, GatewayPrompts},
    orchestrator::{ApologyMessages, FallbackOrchestrator},
    state::AppState,
};
use serde_json::Value;
use tower::util::ServiceExt;

fn chain(backends: &[Arc<MockBackend>]) -> Vec<Arc<dyn InferenceBackend>> {
    backends
        .iter()
        .map(|backend| backend.clone() as Arc<dyn InferenceBackend>)
        .collect()
}

fn app_with(chat: &[Arc<MockBackend>], vision: &[Arc<MockBackend>]) -> Router {
    build_app(state_with(chat, vision))
}

fn state_with(chat: &[Arc<MockBackend>], vision: &[Arc<MockBackend>]) -> AppState {
    let orchestrator = FallbackOrchestrator::new(
        chain(chat),
        chain(vision),
        ApologyMessages {
            chat: "معليش، السيرفر ما رد علي".to_owned(),
            vision: "معليش، ما قدرت أحلل الصورة".to_owned(),
        },
    );
    let gateway = CompletionGateway::new(orchestrator, GatewayPrompts::default());
    AppState::new(gateway, PathBuf::from("/nonexistent-guideme-static"))
}

fn failing(name: &str, capability: Capability, error: BackendError) -> Arc<MockBackend> {
    Arc::new(MockBackend::named(name, capability).with_behavior(MockBehavior::Fail(error)))
}

async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Option<String>, Value) {
    post_body(app, uri, Some("application/json"), body.to_owned()).await
}

async fn post_body(
    app: Router,
    uri: &str,
    content_type: Option<&str>,
    body: String,
) -> (StatusCode, Option<String>, Value) {
    let mut request = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    let response = app
        .oneshot(request.body(Body::from(body)).expect("request build"))
        .await
        .expect("request execution");

    let status = response.status();
    let served_by = response
        .headers()
        .get("x-served-by")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    let json = serde_json::from_slice(&bytes).expect("response body should be JSON");
    (status, served_by, json)
}

#[tokio::test]
async fn chat_without_messages_is_answered_with_the_persona_alone() {
    let backend = Arc::new(MockBackend::named("mock-chat", Capability::Chat));
    let app = app_with(&[backend.clone()], &[]);

    let (status, served_by, body) =
        post_json(app, "/v1/chat/completions", r#"{"messages":[]}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by.as_deref(), Some("mock-chat"));
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Mock response from mock-chat: hello"
    );
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn null_messages_are_answered_like_an_empty_conversation() {
    let backend = Arc::new(MockBackend::named("mock-chat", Capability::Chat));
    let app = app_with(&[backend.clone()], &[]);

    let (status, served_by, _) =
        post_json(app, "/v1/chat/completions", r#"{"messages":null}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by.as_deref(), Some("mock-chat"));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn malformed_chat_bodies_are_400s_with_detail() {
    let backend = Arc::new(MockBackend::named("mock-chat", Capability::Chat));
    let app = app_with(&[backend.clone()], &[]);

    let (status, _, body) = post_json(
        app.clone(),
        "/v1/chat/completions",
        r#"{"messages":[{"role":"robot","content":"hi"}]}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .is_some_and(|detail| detail.starts_with("invalid request body")));

    let (status, _, body) = post_json(app.clone(), "/v1/chat/completions", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, _, body) = post_body(
        app,
        "/v1/chat/completions",
        None,
        r#"{"messages":[]}"#.to_owned(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn chat_falls_back_to_the_next_backend() {
    let first = failing(
        "gemini-chat",
        Capability::Chat,
        BackendError::provider(ProviderErrorKind::Quota, "quota exceeded"),
    );
    let second = Arc::new(
        MockBackend::named("local-chat", Capability::Chat)
            .with_behavior(MockBehavior::Reply("هلا والله".to_owned())),
    );
    let app = app_with(&[first.clone(), second.clone()], &[]);

    let (status, served_by, body) = post_json(
        app,
        "/v1/chat/completions",
        r#"{"messages":[{"role":"user","content":"السلام عليكم"}]}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by.as_deref(), Some("local-chat"));
    assert_eq!(body["choices"][0]["message"]["content"], "هلا والله");
    assert_eq!((first.calls(), second.calls()), (1, 1));
}

#[tokio::test]
async fn exhausted_chat_still_answers_200_with_an_apology() {
    let backends = [
        failing(
            "a",
            Capability::Chat,
            BackendError::Transport("refused".to_owned()),
        ),
        failing(
            "b",
            Capability::Chat,
            BackendError::MalformedResponse("not json".to_owned()),
        ),
    ];
    let app = app_with(&backends, &[]);

    let (status, served_by, body) = post_json(
        app,
        "/v1/chat/completions",
        r#"{"messages":[{"role":"user","content":"hello"}]}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by, None);
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "معليش، السيرفر ما رد علي"
    );
}

#[tokio::test]
async fn vision_without_image_is_a_400_and_no_backend_runs() {
    let backend = Arc::new(MockBackend::named("mock-vision", Capability::Vision));
    let app = app_with(&[], &[backend.clone()]);

    let (status, _, body) =
        post_json(app, "/v1/vision/analyze", r#"{"prompt":"what is this?"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Image is required");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn vision_with_undecodable_image_is_a_400() {
    let backend = Arc::new(MockBackend::named("mock-vision", Capability::Vision));
    let app = app_with(&[], &[backend.clone()]);

    let (status, _, body) =
        post_json(app, "/v1/vision/analyze", r#"{"image":"%%%not-base64%%%"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .is_some_and(|detail| detail.starts_with("image is not valid base64")));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn vision_with_a_wrongly_typed_field_is_a_400_with_detail() {
    let backend = Arc::new(MockBackend::named("mock-vision", Capability::Vision));
    let app = app_with(&[], &[backend.clone()]);

    let (status, _, body) = post_json(app, "/v1/vision/analyze", r#"{"image":42}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn camera_images_larger_than_two_megabytes_are_accepted() {
    let backend = Arc::new(MockBackend::named("mock-vision", Capability::Vision));
    let app = app_with(&[], &[backend.clone()]);
    let body = format!(r#"{{"image":"{}"}}"#, "/9j/".repeat(750_000));
    assert!(body.len() > 3_000_000);

    let (status, served_by, body) =
        post_body(app, "/v1/vision/analyze", Some("application/json"), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by.as_deref(), Some("mock-vision"));
    assert!(body["content"]
        .as_str()
        .is_some_and(|content| content.contains("of 2250000 bytes")));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn images_over_the_configured_limit_are_a_413_with_detail() {
    let backend = Arc::new(MockBackend::named("mock-vision", Capability::Vision));
    let app = build_app(state_with(&[], &[backend.clone()]).with_max_image_bytes(1024));
    let body = format!(r#"{{"image":"{}"}}"#, "/9j/".repeat(50_000));

    let (status, _, body) =
        post_body(app, "/v1/vision/analyze", Some("application/json"), body).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["detail"].is_string());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn vision_advances_past_timeout_and_provider_error() {
    let a = Arc::new(
        MockBackend::named("a", Capability::Vision)
            .with_timeout(Duration::from_millis(50))
            .with_behavior(MockBehavior::Delay(
                Duration::from_secs(30),
                "late".to_owned(),
            )),
    );
    let b = failing(
        "b",
        Capability::Vision,
        BackendError::provider(ProviderErrorKind::SafetyBlock, "blocked"),
    );
    let c = Arc::new(
        MockBackend::named("c", Capability::Vision)
            .with_behavior(MockBehavior::Reply("صورة فيها باب".to_owned())),
    );
    let app = app_with(&[], &[a.clone(), b.clone(), c.clone()]);

    let (status, served_by, body) =
        post_json(app, "/v1/vision/analyze", r#"{"image":"/9j/4AAQ"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"content": "صورة فيها باب"}));
    assert_eq!(served_by.as_deref(), Some("c"));
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
}

#[tokio::test]
async fn exhausted_vision_answers_200_with_an_apology() {
    let backend = failing(
        "only",
        Capability::Vision,
        BackendError::Timeout("slow".to_owned()),
    );
    let app = app_with(&[], &[backend]);

    let (status, _, body) = post_json(
        app,
        "/v1/vision/analyze",
        r#"{"image":"data:image/jpeg;base64,/9j/4AAQ","prompt":"وش قدامي؟"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "معليش، ما قدرت أحلل الصورة");
}

#[tokio::test]
async fn missing_static_asset_is_a_json_404() {
    let app = app_with(&[], &[]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/logo.png")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = to_bytes(response.into_body(), 1024)
        .await
        .expect("body should be readable");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["error"], "not found");
}

#[tokio::test]
async fn unconfigured_gateway_serves_from_mock_chains_and_exports_metrics() {
    let env = HashMap::from([("GATEWAY_STATIC_DIR", "/nonexistent-guideme-static")]);
    let config = GatewayConfig::from_lookup(|key| env.get(key).map(|value| value.to_string()))
        .expect("valid config");
    let app = build_app(build_state(&config).expect("state builds"));

    let (status, served_by, _) = post_json(
        app.clone(),
        "/v1/chat/completions",
        r#"{"messages":[{"role":"user","content":"hi"}]}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served_by.as_deref(), Some("mock-chat"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    let text = String::from_utf8(bytes.to_vec()).expect("metrics should be UTF-8");
    assert!(text.contains("gateway_backend_attempts_total"));
}

#[test]
fn listing_a_remote_provider_without_a_key_fails_fast() {
    let config = GatewayConfig::from_lookup(|key| {
        (key == "GATEWAY_CHAT_BACKENDS").then(|| "gemini".to_owned())
    })
    .expect("valid config");

    assert!(build_state(&config).is_err());
}
