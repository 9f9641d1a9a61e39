use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    backend::{
        build_http_client, map_transport_error, read_json, BackendDescriptor, BackendError,
        InferenceBackend, ProviderErrorKind,
    },
    models::{ChatRequest, MessageRole, VisionRequest},
    normalizer::{CandidatesEnvelope, RawPayload},
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const SAFETY_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Remote adapter for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiAdapter {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
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

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url, self.descriptor.model
        )
    }

    async fn generate(&self, payload: Value) -> Result<RawPayload, BackendError> {
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let envelope: CandidatesEnvelope = read_json(response).await?;
        check_envelope(&envelope)?;
        debug!(
            backend = %self.descriptor.identifier,
            candidates = envelope.candidates.len(),
            "gemini envelope received"
        );
        Ok(RawPayload::Candidates(envelope))
    }

    fn generation_config(&self) -> Value {
        json!({
            "maxOutputTokens": self.descriptor.generation.max_tokens,
            "temperature": self.descriptor.generation.temperature,
        })
    }
}

#[async_trait]
impl InferenceBackend for GeminiAdapter {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ChatRequest) -> Result<RawPayload, BackendError> {
        let payload = chat_payload(request, self.generation_config());
        self.generate(payload).await
    }

    async fn describe(&self, request: &VisionRequest) -> Result<RawPayload, BackendError> {
        let payload = vision_payload(request, self.generation_config());
        self.generate(payload).await
    }
}

fn safety_settings() -> Value {
    Value::Array(
        HARM_CATEGORIES
            .iter()
            .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
            .collect(),
    )
}

fn chat_payload(request: &ChatRequest, generation_config: Value) -> Value {
    let mut contents = request
        .turns()
        .map(|message| {
            let role = match message.role {
                MessageRole::Assistant => "model",
                _ => "user",
            };
            json!({"role": role, "parts": [{"text": message.content}]})
        })
        .collect::<Vec<_>>();
    let mut system = request.system_text();

    // generateContent rejects an empty `contents`; the framing becomes the turn.
    if contents.is_empty() {
        if let Some(text) = system.take() {
            contents.push(json!({"role": "user", "parts": [{"text": text}]}));
        }
    }

    let mut payload = json!({
        "contents": contents,
        "generationConfig": generation_config,
        "safetySettings": safety_settings(),
    });
    if let Some(text) = system {
        payload["systemInstruction"] = json!({"parts": [{"text": text}]});
    }
    payload
}

fn vision_payload(request: &VisionRequest, generation_config: Value) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"text": request.prompt},
                {"inlineData": {"mimeType": request.mime_type(), "data": STANDARD.encode(&request.image)}}
            ]
        }],
        "generationConfig": generation_config,
        "safetySettings": safety_settings(),
    })
}

fn check_envelope(envelope: &CandidatesEnvelope) -> Result<(), BackendError> {
    if envelope.candidates.is_empty() {
        if let Some(reason) = envelope
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(BackendError::provider(
                ProviderErrorKind::SafetyBlock,
                format!("prompt blocked: {reason}"),
            ));
        }
        return Ok(());
    }

    let all_blocked = envelope.candidates.iter().all(|candidate| {
        candidate
            .finish_reason
            .as_deref()
            .is_some_and(|reason| SAFETY_FINISH_REASONS.contains(&reason))
    });
    if all_blocked {
        let reason = envelope.candidates[0]
            .finish_reason
            .clone()
            .unwrap_or_default();
        return Err(BackendError::provider(
            ProviderErrorKind::SafetyBlock,
            format!("candidate blocked: {reason}"),
        ));
    }

    Ok(())
}
