use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    errors::{apply_header, AppError},
    models::{
        ChatCompletionsRequest, ChatCompletionsResponse, VisionAnalyzeRequest,
        VisionAnalyzeResponse,
    },
    orchestrator::Dispatch,
    state::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionsRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let response = match payload {
        Ok(Json(request)) => answer_chat(&state, request).await,
        Err(rejection) => rejected_body("/v1/chat/completions", rejection),
    };

    state.metrics.observe_request(
        "/v1/chat/completions",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn answer_chat(state: &AppState, request: ChatCompletionsRequest) -> Response {
    let request_id = format!("chatcmpl-{}", Uuid::new_v4());
    info!(
        request_id = %request_id,
        messages = request.messages.len(),
        "chat request accepted"
    );

    match state.gateway.chat(request).await {
        Ok(dispatch) => {
            state.metrics.observe_dispatch(&dispatch);
            let served_by = dispatch.response.served_by.clone();
            log_dispatch(&request_id, &dispatch);
            let payload = ChatCompletionsResponse::from_normalized(
                request_id,
                unix_timestamp(),
                dispatch.response,
            );
            with_served_by(Json(payload).into_response(), served_by.as_deref())
        }
        Err(error) => AppError::from(error).into_response(),
    }
}

pub async fn vision_analyze(
    State(state): State<AppState>,
    payload: Result<Json<VisionAnalyzeRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();
    let response = match payload {
        Ok(Json(request)) => answer_vision(&state, request).await,
        Err(rejection) => rejected_body("/v1/vision/analyze", rejection),
    };

    state.metrics.observe_request(
        "/v1/vision/analyze",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn answer_vision(state: &AppState, request: VisionAnalyzeRequest) -> Response {
    let request_id = format!("vision-{}", Uuid::new_v4());
    info!(
        request_id = %request_id,
        has_prompt = request.prompt.is_some(),
        "vision request accepted"
    );

    match state.gateway.vision(request).await {
        Ok(dispatch) => {
            state.metrics.observe_dispatch(&dispatch);
            log_dispatch(&request_id, &dispatch);
            let served_by = dispatch.response.served_by.clone();
            let payload = VisionAnalyzeResponse {
                content: dispatch.response.text,
            };
            with_served_by(Json(payload).into_response(), served_by.as_deref())
        }
        Err(error) => {
            info!(request_id = %request_id, error = %error, "vision request rejected");
            AppError::from(error).into_response()
        }
    }
}

fn rejected_body(path: &str, rejection: JsonRejection) -> Response {
    info!(path, status = rejection.status().as_u16(), "request body rejected");
    AppError::from(rejection).into_response()
}

pub async fn index(state: State<AppState>) -> Response {
    static_file(state, "index.html", "text/html; charset=utf-8").await
}

pub async fn stylesheet(state: State<AppState>) -> Response {
    static_file(state, "styles.css", "text/css; charset=utf-8").await
}

pub async fn script(state: State<AppState>) -> Response {
    static_file(state, "app.js", "text/javascript; charset=utf-8").await
}

pub async fn logo(state: State<AppState>) -> Response {
    static_file(state, "logo.png", "image/png").await
}

async fn static_file(
    State(state): State<AppState>,
    name: &str,
    content_type: &'static str,
) -> Response {
    match tokio::fs::read(state.static_dir.join(name)).await {
        Ok(bytes) => ([(CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(_) => AppError::NotFound("not found".to_owned()).into_response(),
    }
}

fn log_dispatch(request_id: &str, dispatch: &Dispatch) {
    info!(
        request_id = %request_id,
        capability = %dispatch.capability,
        served_by = dispatch.response.served_by.as_deref().unwrap_or("none"),
        succeeded = dispatch.response.succeeded,
        attempts = dispatch.attempts.len(),
        "request answered"
    );
}

fn with_served_by(mut response: Response, served_by: Option<&str>) -> Response {
    if let Some(backend) = served_by {
        apply_header(response.headers_mut(), "x-served-by", backend);
    }
    response
}

fn unix_timestamp() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() as i64
}
