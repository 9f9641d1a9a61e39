use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    backend::{
        build_http_client, map_transport_error, read_json, BackendDescriptor, BackendError,
        InferenceBackend,
    },
    models::{ChatRequest, VisionRequest},
    normalizer::{ChoicesEnvelope, RawPayload},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";

/// Remote adapter for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiAdapter {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(
        descriptor: BackendDescriptor,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, String> {
        let client = build_http_client(descriptor.timeout)?;
        Ok(Self {
            descriptor,
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn chat_completions(&self, messages: Vec<Value>) -> Result<RawPayload, BackendError> {
        let payload = json!({
            "model": self.descriptor.model,
            "messages": messages,
            "max_tokens": self.descriptor.generation.max_tokens,
            "temperature": self.descriptor.generation.temperature,
            "stream": false
        });

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let envelope: ChoicesEnvelope = read_json(response).await?;
        debug!(
            backend = %self.descriptor.identifier,
            choices = envelope.choices.len(),
            "chat completion envelope received"
        );
        Ok(RawPayload::Choices(envelope))
    }
}

#[async_trait]
impl InferenceBackend for OpenAiAdapter {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ChatRequest) -> Result<RawPayload, BackendError> {
        self.chat_completions(chat_messages(request)).await
    }

    async fn describe(&self, request: &VisionRequest) -> Result<RawPayload, BackendError> {
        self.chat_completions(vision_messages(request)).await
    }
}

fn chat_messages(request: &ChatRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
        .collect()
}

fn vision_messages(request: &VisionRequest) -> Vec<Value> {
    let data_url = format!(
        "data:{};base64,{}",
        request.mime_type(),
        STANDARD.encode(&request.image)
    );
    vec![json!({
        "role": "user",
        "content": [
            {"type": "text", "text": request.prompt},
            {"type": "image_url", "image_url": {"url": data_url}}
        ]
    })]
}
