use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    backend::{BackendDescriptor, BackendError, BackendKind, Capability, InferenceBackend},
    models::{ChatRequest, MessageRole, VisionRequest},
    normalizer::{Choice, ChoiceMessage, ChoicesEnvelope, RawPayload},
};

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Answer with text derived from the request.
    Echo,
    Reply(String),
    Fail(BackendError),
    /// Sleep before replying; used to exercise timeouts.
    Delay(Duration, String),
    Payload(RawPayload),
}

/// Scripted in-memory adapter that counts its invocations.
#[derive(Debug)]
pub struct MockBackend {
    descriptor: BackendDescriptor,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(descriptor: BackendDescriptor, behavior: MockBehavior) -> Self {
        Self {
            descriptor,
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn named(name: impl Into<String>, capability: Capability) -> Self {
        Self::new(
            BackendDescriptor::new(
                name,
                BackendKind::Local,
                capability,
                "mock",
                Duration::from_secs(5),
            ),
            MockBehavior::Echo,
        )
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = timeout;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, echo: String) -> Result<RawPayload, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(backend = %self.descriptor.identifier, "mock invoked");
        match &self.behavior {
            MockBehavior::Echo => Ok(choices(echo)),
            MockBehavior::Reply(text) => Ok(choices(text.clone())),
            MockBehavior::Fail(error) => Err(error.clone()),
            MockBehavior::Delay(delay, text) => {
                sleep(*delay).await;
                Ok(choices(text.clone()))
            }
            MockBehavior::Payload(payload) => Ok(payload.clone()),
        }
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: &ChatRequest) -> Result<RawPayload, BackendError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.as_str())
            .unwrap_or("hello");
        let echo = format!("Mock response from {}: {prompt}", self.descriptor.identifier);
        self.respond(echo).await
    }

    async fn describe(&self, request: &VisionRequest) -> Result<RawPayload, BackendError> {
        let echo = format!(
            "Mock description from {} of {} bytes: {}",
            self.descriptor.identifier,
            request.image.len(),
            request.prompt
        );
        self.respond(echo).await
    }
}

fn choices(content: String) -> RawPayload {
    RawPayload::Choices(ChoicesEnvelope {
        choices: vec![Choice {
            message: Some(ChoiceMessage {
                content: Some(content),
            }),
        }],
    })
}
