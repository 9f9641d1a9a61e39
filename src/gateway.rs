use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use crate::{
    errors::InputError,
    models::{
        BackendRequest, ChatCompletionsRequest, ChatRequest, Message, MessageRole,
        VisionAnalyzeRequest, VisionRequest,
    },
    orchestrator::{Dispatch, FallbackOrchestrator},
};

pub const DEFAULT_PERSONA: &str = "أنت 'دليل' المساعد الذكي لمشروع GuideMe. مهمتك مساعدة المكفوفين. تتحدث باللهجة السعودية البيضاء الودودة. إجاباتك مختصرة ومفيدة جداً.";
pub const DEFAULT_VISION_PROMPT: &str =
    "وش تشوف في هالصورة؟ صفها للمكفوفين باختصار شديد باللهجة السعودية.";

#[derive(Debug, Clone)]
pub struct GatewayPrompts {
    /// Framing prepended to every chat conversation.
    pub persona: String,
    /// Used when a vision request carries no prompt.
    pub vision_prompt: String,
}

impl Default for GatewayPrompts {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_owned(),
            vision_prompt: DEFAULT_VISION_PROMPT.to_owned(),
        }
    }
}

/// Request-facing entry point: validates, frames and delegates to the
/// orchestrator. Holds no per-request state.
pub struct CompletionGateway {
    orchestrator: FallbackOrchestrator,
    prompts: GatewayPrompts,
}

impl CompletionGateway {
    pub fn new(orchestrator: FallbackOrchestrator, prompts: GatewayPrompts) -> Self {
        Self {
            orchestrator,
            prompts,
        }
    }

    pub async fn chat(&self, request: ChatCompletionsRequest) -> Result<Dispatch, InputError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Message::new(MessageRole::System, self.prompts.persona.clone()));
        messages.extend(request.messages);
        debug!(messages = messages.len(), "chat request framed");

        self.orchestrator
            .dispatch(BackendRequest::Chat(ChatRequest { messages }))
            .await
    }

    pub async fn vision(&self, request: VisionAnalyzeRequest) -> Result<Dispatch, InputError> {
        let encoded = request
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or(InputError::MissingImage)?;
        let image = decode_image(encoded)?;
        let prompt = request
            .prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or_else(|| self.prompts.vision_prompt.clone());
        debug!(image_bytes = image.len(), "vision request decoded");

        self.orchestrator
            .dispatch(BackendRequest::Vision(VisionRequest { image, prompt }))
            .await
    }
}

/// Decodes a bare base64 payload or a `data:<mime>;base64,` URL.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, InputError> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| InputError::InvalidImage("data URL without payload".to_owned()))?,
        None => encoded,
    };
    let compact = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();

    let image = STANDARD
        .decode(compact)
        .map_err(|error| InputError::InvalidImage(error.to_string()))?;
    if image.is_empty() {
        return Err(InputError::MissingImage);
    }
    Ok(image)
}
