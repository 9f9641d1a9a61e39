pub mod gemini;
pub mod local;
pub mod mock;
pub mod openai;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    models::{ChatRequest, GenerationParams, VisionRequest},
    normalizer::RawPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Vision,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Vision => "vision",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

/// Static identity and invocation limits of one adapter.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub identifier: String,
    pub kind: BackendKind,
    pub capability: Capability,
    pub model: String,
    pub timeout: Duration,
    pub generation: GenerationParams,
}

impl BackendDescriptor {
    pub fn new(
        identifier: impl Into<String>,
        kind: BackendKind,
        capability: Capability,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            capability,
            model: model.into(),
            timeout,
            generation: GenerationParams::for_capability(capability),
        }
    }

    pub fn with_generation(mut self, generation: GenerationParams) -> Self {
        self.generation = generation;
        self
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().identifier
    }

    async fn complete(&self, request: &ChatRequest) -> Result<RawPayload, BackendError>;

    async fn describe(&self, request: &VisionRequest) -> Result<RawPayload, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    SafetyBlock,
    Quota,
    Rejected,
    Unavailable,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::SafetyBlock => "safety_block",
            ProviderErrorKind::Quota => "quota",
            ProviderErrorKind::Rejected => "rejected",
            ProviderErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend transport error: {0}")]
    Transport(String),
    #[error("backend provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },
    #[error("backend malformed response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        BackendError::Provider {
            kind,
            message: message.into(),
        }
    }

    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BackendError::Timeout(_) => "timeout",
            BackendError::Transport(_) => "transport",
            BackendError::Provider { kind, .. } => match kind {
                ProviderErrorKind::SafetyBlock => "provider_safety_block",
                ProviderErrorKind::Quota => "provider_quota",
                ProviderErrorKind::Rejected => "provider_rejected",
                ProviderErrorKind::Unavailable => "provider_unavailable",
            },
            BackendError::MalformedResponse(_) => "malformed_response",
        }
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| format!("failed to build HTTP client: {error}"))
}

pub(crate) fn map_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(error.to_string())
    } else if error.is_decode() {
        BackendError::MalformedResponse(error.to_string())
    } else {
        BackendError::Transport(error.to_string())
    }
}

pub(crate) fn map_http_error(status: StatusCode, body: &str) -> BackendError {
    let trimmed = body.chars().take(400).collect::<String>();
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Timeout(format!("upstream timeout: {trimmed}"))
        }
        StatusCode::TOO_MANY_REQUESTS => BackendError::provider(
            ProviderErrorKind::Quota,
            format!("rate limited: {trimmed}"),
        ),
        status if status.is_server_error() => BackendError::provider(
            ProviderErrorKind::Unavailable,
            format!("status {}: {trimmed}", status.as_u16()),
        ),
        status => BackendError::provider(
            ProviderErrorKind::Rejected,
            format!("status {}: {trimmed}", status.as_u16()),
        ),
    }
}

/// Reads a JSON body, mapping non-success statuses and undecodable bodies.
pub(crate) async fn read_json<T>(response: reqwest::Response) -> Result<T, BackendError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;
    if !status.is_success() {
        return Err(map_http_error(status, &body));
    }

    serde_json::from_str(&body).map_err(|error| BackendError::MalformedResponse(error.to_string()))
}
