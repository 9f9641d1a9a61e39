//! Adapter for a locally hosted quantized model.
//!
//! Model loading and GPU placement belong to the local runtime; this
//! adapter only talks to its `generate` endpoint. Access is admitted through
//! a semaphore so a model that cannot run concurrently is never asked to.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
    backend::{
        build_http_client, map_transport_error, read_json, BackendDescriptor, BackendError,
        InferenceBackend, ProviderErrorKind,
    },
    models::{ChatRequest, MessageRole, VisionRequest},
    normalizer::{GeneratedTextEnvelope, RawPayload},
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_CHAT_MODEL: &str = "qwen2.5:3b-instruct";
pub const DEFAULT_VISION_MODEL: &str = "qwen2.5vl:3b";

#[derive(Clone)]
pub struct LocalAdapter {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    base_url: String,
    gate: Arc<Semaphore>,
}

impl LocalAdapter {
    /// `gate` is shared by every adapter backed by the same model runtime;
    /// its permit count is how many generations the model may run at once.
    pub fn with_gate(
        descriptor: BackendDescriptor,
        base_url: impl Into<String>,
        gate: Arc<Semaphore>,
    ) -> Result<Self, String> {
        let client = build_http_client(descriptor.timeout)?;
        Ok(Self {
            descriptor,
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            gate,
        })
    }

    async fn generate(&self, payload: Value) -> Result<RawPayload, BackendError> {
        let _permit = self.gate.acquire().await.map_err(|_| {
            BackendError::provider(ProviderErrorKind::Unavailable, "local model gate closed")
        })?;

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let envelope: GeneratedTextEnvelope = read_json(response).await?;
        debug!(
            backend = %self.descriptor.identifier,
            done_reason = envelope.done_reason.as_deref().unwrap_or("unknown"),
            "local generation finished"
        );
        Ok(RawPayload::GeneratedText(envelope))
    }

    fn options(&self) -> Value {
        json!({
            "num_predict": self.descriptor.generation.max_tokens,
            "temperature": self.descriptor.generation.temperature,
        })
    }
}

#[async_trait]
impl InferenceBackend for LocalAdapter {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ChatRequest) -> Result<RawPayload, BackendError> {
        let mut prompt = render_prompt(request);
        let mut system = request.system_text();
        // An empty prompt only loads the model; the framing becomes the prompt.
        if prompt.is_empty() {
            prompt = system.take().unwrap_or_default();
        }

        let mut payload = json!({
            "model": self.descriptor.model,
            "prompt": prompt,
            "stream": false,
            "options": self.options(),
        });
        if let Some(system) = system {
            payload["system"] = Value::String(system);
        }
        self.generate(payload).await
    }

    async fn describe(&self, request: &VisionRequest) -> Result<RawPayload, BackendError> {
        let payload = json!({
            "model": self.descriptor.model,
            "prompt": request.prompt,
            "images": [STANDARD.encode(&request.image)],
            "stream": false,
            "options": self.options(),
        });
        self.generate(payload).await
    }
}

/// Flattens the conversation turns into a single prompt for `generate`.
fn render_prompt(request: &ChatRequest) -> String {
    let turns = request.turns().collect::<Vec<_>>();
    match turns.as_slice() {
        [] => String::new(),
        [only] if only.role == MessageRole::User => only.content.clone(),
        turns => {
            let mut prompt = turns
                .iter()
                .map(|message| format!("{}: {}", message.role.as_str(), message.content))
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str("\nassistant:");
            prompt
        }
    }
}
