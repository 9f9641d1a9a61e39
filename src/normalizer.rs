//! Conversion of provider envelopes into [`NormalizedResponse`].
//!
//! Every adapter hands back a [`RawPayload`]; the variant records which
//! envelope shape the provider used. Wrapper fields such as finish reasons
//! and token counts are parsed only where an adapter needs them to detect a
//! provider-side failure and never reach the caller.

use serde::Deserialize;
use thiserror::Error;

use crate::{backend::BackendDescriptor, models::NormalizedResponse};

#[derive(Debug, Clone)]
pub enum RawPayload {
    /// Gemini `generateContent` style: `candidates[].content.parts[].text`.
    Candidates(CandidatesEnvelope),
    /// OpenAI-compatible chat completions: `choices[].message.content`.
    Choices(ChoicesEnvelope),
    /// Local runtime `generate` endpoint: top-level `response` text.
    GeneratedText(GeneratedTextEnvelope),
}

impl RawPayload {
    pub fn shape(&self) -> &'static str {
        match self {
            RawPayload::Candidates(_) => "candidates",
            RawPayload::Choices(_) => "choices",
            RawPayload::GeneratedText(_) => "generated_text",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesEnvelope {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoicesEnvelope {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratedTextEnvelope {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done_reason: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{backend} returned a {shape} payload without {capability} text")]
pub struct NormalizationError {
    pub backend: String,
    pub capability: String,
    pub shape: &'static str,
}

pub fn normalize(
    payload: RawPayload,
    descriptor: &BackendDescriptor,
) -> Result<NormalizedResponse, NormalizationError> {
    let shape = payload.shape();
    let text = match payload {
        RawPayload::Candidates(envelope) => envelope
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text)),
        RawPayload::Choices(envelope) => envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content),
        RawPayload::GeneratedText(envelope) => envelope.response,
    };

    match text.filter(|text| !text.trim().is_empty()) {
        Some(text) => Ok(NormalizedResponse::served(text, &descriptor.identifier)),
        None => Err(NormalizationError {
            backend: descriptor.identifier.clone(),
            capability: descriptor.capability.to_string(),
            shape,
        }),
    }
}
