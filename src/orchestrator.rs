//! Ordered, sequential fallback across the adapters of one capability.
//!
//! Each dispatch walks the chain front to back, giving every adapter a single
//! attempt bounded by its descriptor timeout. The first normalized success is
//! returned; if every adapter fails the configured apology is returned as a
//! degraded response instead of an error.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendDescriptor, BackendError, Capability, InferenceBackend},
    errors::InputError,
    models::{BackendRequest, NormalizedResponse},
    normalizer::{normalize, NormalizationError},
};

pub const DEFAULT_CHAT_APOLOGY: &str = "معليش، السيرفر ما رد علي، جرب مرة ثانية.";
pub const DEFAULT_VISION_APOLOGY: &str = "معليش، ما قدرت أحلل الصورة حالياً.";

#[derive(Debug, Clone)]
pub struct ApologyMessages {
    pub chat: String,
    pub vision: String,
}

impl Default for ApologyMessages {
    fn default() -> Self {
        Self {
            chat: DEFAULT_CHAT_APOLOGY.to_owned(),
            vision: DEFAULT_VISION_APOLOGY.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

impl AttemptFailure {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptFailure::Backend(error) => error.label(),
            AttemptFailure::Normalization(_) => "normalization",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub backend: BackendDescriptor,
    pub result: Result<NormalizedResponse, AttemptFailure>,
    pub latency: Duration,
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(_) => "success",
            Err(failure) => failure.label(),
        }
    }
}

/// Result of one dispatch: the caller-facing response plus the trail of
/// attempts that produced it.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub capability: Capability,
    pub response: NormalizedResponse,
    pub attempts: Vec<AttemptOutcome>,
}

impl Dispatch {
    pub fn exhausted(&self) -> bool {
        !self.response.succeeded
    }
}

pub struct FallbackOrchestrator {
    chat: Vec<Arc<dyn InferenceBackend>>,
    vision: Vec<Arc<dyn InferenceBackend>>,
    apology: ApologyMessages,
}

impl FallbackOrchestrator {
    pub fn new(
        chat: Vec<Arc<dyn InferenceBackend>>,
        vision: Vec<Arc<dyn InferenceBackend>>,
        apology: ApologyMessages,
    ) -> Self {
        Self {
            chat,
            vision,
            apology,
        }
    }

    pub fn chain(&self, capability: Capability) -> &[Arc<dyn InferenceBackend>] {
        match capability {
            Capability::Chat => &self.chat,
            Capability::Vision => &self.vision,
        }
    }

    pub fn apology(&self, capability: Capability) -> &str {
        match capability {
            Capability::Chat => &self.apology.chat,
            Capability::Vision => &self.apology.vision,
        }
    }

    pub async fn dispatch(&self, request: BackendRequest) -> Result<Dispatch, InputError> {
        let capability = request.capability();
        if let BackendRequest::Vision(vision) = &request {
            if vision.image.is_empty() {
                return Err(InputError::MissingImage);
            }
        }

        let chain = self.chain(capability);
        if chain.is_empty() {
            return Err(InputError::CapabilityUnavailable(capability));
        }

        let mut attempts = Vec::with_capacity(chain.len());
        for backend in chain {
            let started = Instant::now();
            let result = attempt(backend.as_ref(), &request).await;
            let latency = started.elapsed();
            let outcome = AttemptOutcome {
                backend: backend.descriptor().clone(),
                result,
                latency,
            };

            match &outcome.result {
                Ok(response) => {
                    info!(
                        capability = %capability,
                        backend = %outcome.backend.identifier,
                        attempt = attempts.len() + 1,
                        latency_ms = latency.as_millis() as u64,
                        "dispatch served"
                    );
                    let response = response.clone();
                    attempts.push(outcome);
                    return Ok(Dispatch {
                        capability,
                        response,
                        attempts,
                    });
                }
                Err(failure) => {
                    warn!(
                        capability = %capability,
                        backend = %outcome.backend.identifier,
                        outcome = failure.label(),
                        error = %failure,
                        latency_ms = latency.as_millis() as u64,
                        "backend attempt failed, advancing"
                    );
                    attempts.push(outcome);
                }
            }
        }

        warn!(
            capability = %capability,
            attempts = attempts.len(),
            "all backends exhausted, answering with apology"
        );
        Ok(Dispatch {
            capability,
            response: NormalizedResponse::degraded(self.apology(capability)),
            attempts,
        })
    }
}

async fn attempt(
    backend: &dyn InferenceBackend,
    request: &BackendRequest,
) -> Result<NormalizedResponse, AttemptFailure> {
    let descriptor = backend.descriptor();
    let call = async {
        match request {
            BackendRequest::Chat(chat) => backend.complete(chat).await,
            BackendRequest::Vision(vision) => backend.describe(vision).await,
        }
    };

    let payload = match timeout(descriptor.timeout, call).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(BackendError::Timeout(format!(
                "no response within {}ms",
                descriptor.timeout.as_millis()
            ))
            .into())
        }
    };
    debug!(backend = %descriptor.identifier, shape = payload.shape(), "normalizing payload");

    Ok(normalize(payload, descriptor)?)
}
