use serde::{Deserialize, Serialize};

use crate::backend::Capability;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Backend-neutral chat request, built by the gateway for one call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

impl ChatRequest {
    /// Concatenated content of every system message, if any.
    pub fn system_text(&self) -> Option<String> {
        let parts = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
    }
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub image: Vec<u8>,
    pub prompt: String,
}

impl VisionRequest {
    /// Best-effort MIME type from the image magic bytes; JPEG otherwise.
    pub fn mime_type(&self) -> &'static str {
        let image = self.image.as_slice();
        if image.starts_with(&[0x89, b'P', b'N', b'G']) {
            "image/png"
        } else if image.starts_with(b"GIF8") {
            "image/gif"
        } else if image.len() >= 12 && &image[..4] == b"RIFF" && &image[8..12] == b"WEBP" {
            "image/webp"
        } else {
            "image/jpeg"
        }
    }
}

#[derive(Debug, Clone)]
pub enum BackendRequest {
    Chat(ChatRequest),
    Vision(VisionRequest),
}

impl BackendRequest {
    pub fn capability(&self) -> Capability {
        match self {
            BackendRequest::Chat(_) => Capability::Chat,
            BackendRequest::Vision(_) => Capability::Vision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationParams {
    pub fn for_capability(capability: Capability) -> Self {
        match capability {
            Capability::Chat => Self {
                max_tokens: 512,
                temperature: 0.7,
            },
            Capability::Vision => Self {
                max_tokens: 300,
                temperature: 0.4,
            },
        }
    }
}

/// The only response shape handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedResponse {
    pub text: String,
    pub served_by: Option<String>,
    pub succeeded: bool,
}

impl NormalizedResponse {
    pub fn served(text: String, served_by: impl Into<String>) -> Self {
        Self {
            text,
            served_by: Some(served_by.into()),
            succeeded: true,
        }
    }

    pub fn degraded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            served_by: None,
            succeeded: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionsResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatCompletionsResponse {
    pub fn from_normalized(id: String, created: i64, response: NormalizedResponse) -> Self {
        let finish_reason = if response.succeeded { "stop" } else { "error" };
        Self {
            id,
            object: "chat.completion".to_owned(),
            created,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content: response.text,
                },
                finish_reason: finish_reason.to_owned(),
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionAnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VisionAnalyzeResponse {
    pub content: String,
}
