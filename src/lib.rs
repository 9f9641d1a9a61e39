pub mod backend;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod state;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use backend::{
    gemini::GeminiAdapter, local::LocalAdapter, mock::MockBackend, openai::OpenAiAdapter,
    BackendDescriptor, BackendKind, Capability, InferenceBackend,
};
use config::{ConfigError, GatewayConfig, Provider, ProviderSettings};
use gateway::CompletionGateway;
use orchestrator::FallbackOrchestrator;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub fn build_state(config: &GatewayConfig) -> Result<state::AppState, ConfigError> {
    let mut local_gates = HashMap::new();
    let chat = build_chain(config, Capability::Chat, &mut local_gates)?;
    let vision = build_chain(config, Capability::Vision, &mut local_gates)?;

    let orchestrator = FallbackOrchestrator::new(chat, vision, config.apology.clone());
    let gateway = CompletionGateway::new(orchestrator, config.prompts.clone());
    Ok(state::AppState::new(gateway, config.static_dir.clone())
        .with_max_image_bytes(config.max_image_bytes))
}

fn build_chain(
    config: &GatewayConfig,
    capability: Capability,
    local_gates: &mut HashMap<String, Arc<Semaphore>>,
) -> Result<Vec<Arc<dyn InferenceBackend>>, ConfigError> {
    let mut chain: Vec<Arc<dyn InferenceBackend>> = Vec::new();
    for provider in config.chain(capability) {
        let backend: Arc<dyn InferenceBackend> = match config.settings(*provider) {
            Some(settings) => build_adapter(config, settings, capability, local_gates)?,
            None => Arc::new(mock_backend(config, capability, chain.len())),
        };
        chain.push(backend);
    }

    if chain.is_empty() {
        warn!(
            capability = %capability,
            "no providers configured, falling back to mock backends"
        );
        chain.push(Arc::new(mock_backend(config, capability, 0)));
    }

    let names = chain
        .iter()
        .map(|backend| backend.name().to_owned())
        .collect::<Vec<_>>()
        .join(",");
    info!(capability = %capability, chain = %names, "fallback chain configured");
    Ok(chain)
}

fn build_adapter(
    config: &GatewayConfig,
    settings: &ProviderSettings,
    capability: Capability,
    local_gates: &mut HashMap<String, Arc<Semaphore>>,
) -> Result<Arc<dyn InferenceBackend>, ConfigError> {
    let provider = settings.provider;
    let kind = match provider {
        Provider::Local => BackendKind::Local,
        _ => BackendKind::Remote,
    };
    let descriptor = BackendDescriptor::new(
        format!("{provider}-{capability}"),
        kind,
        capability,
        settings.model(capability),
        settings.timeout.unwrap_or_else(|| config.timeout(capability)),
    )
    .with_generation(settings.generation(capability));
    let adapter_error = |message: String| ConfigError::Adapter { provider, message };

    let backend: Arc<dyn InferenceBackend> = if provider == Provider::Local {
        // One admission gate per local model, shared across capabilities.
        let gate = local_gates
            .entry(settings.model(capability).to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(settings.max_concurrency)))
            .clone();
        Arc::new(
            LocalAdapter::with_gate(descriptor, &settings.base_url, gate).map_err(adapter_error)?,
        )
    } else {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingCredential {
                provider,
                key: format!("{}_API_KEY", provider.as_str().to_ascii_uppercase()),
            })?;
        if provider == Provider::Gemini {
            Arc::new(
                GeminiAdapter::new(descriptor, api_key, &settings.base_url)
                    .map_err(adapter_error)?,
            )
        } else {
            Arc::new(
                OpenAiAdapter::new(descriptor, api_key, &settings.base_url)
                    .map_err(adapter_error)?,
            )
        }
    };
    Ok(backend)
}

fn mock_backend(config: &GatewayConfig, capability: Capability, position: usize) -> MockBackend {
    let name = match position {
        0 => format!("mock-{capability}"),
        position => format!("mock-{capability}-{position}"),
    };
    MockBackend::named(name, capability).with_timeout(config.timeout(capability))
}

pub fn build_app(state: state::AppState) -> Router {
    let vision_body_limit = state.vision_body_limit();
    Router::new()
        .route("/", get(handlers::index))
        .route("/styles.css", get(handlers::stylesheet))
        .route("/app.js", get(handlers::script))
        .route("/logo.png", get(handlers::logo))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route(
            "/v1/vision/analyze",
            post(handlers::vision_analyze).layer(DefaultBodyLimit::max(vision_body_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
