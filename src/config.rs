//! Startup configuration read from the environment.
//!
//! Everything is resolved once in [`GatewayConfig::from_env`]; adapters get
//! their settings through constructors and never consult the environment.

use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    backend::{gemini, local, openai, Capability},
    gateway::GatewayPrompts,
    models::GenerationParams,
    orchestrator::ApologyMessages,
    state::DEFAULT_MAX_IMAGE_BYTES,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown provider {0:?} (expected gemini, openai, local or mock)")]
    UnknownProvider(String),
    #[error("provider {provider} is listed but {key} is not set")]
    MissingCredential { provider: Provider, key: String },
    #[error("failed to build {provider} adapter: {message}")]
    Adapter { provider: Provider, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
    Local,
    Mock,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Local => "local",
            Provider::Mock => "mock",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI",
            Provider::OpenAi => "OPENAI",
            Provider::Local => "LOCAL",
            Provider::Mock => "MOCK",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            "local" => Ok(Provider::Local),
            "mock" => Ok(Provider::Mock),
            other => Err(ConfigError::UnknownProvider(other.to_owned())),
        }
    }
}

/// Connection and generation settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub timeout: Option<Duration>,
    pub chat_generation: GenerationParams,
    pub vision_generation: GenerationParams,
    pub max_concurrency: usize,
    /// Whether enough was set for the provider to join a default chain.
    pub configured: bool,
}

impl ProviderSettings {
    pub fn model(&self, capability: Capability) -> &str {
        match capability {
            Capability::Chat => &self.chat_model,
            Capability::Vision => &self.vision_model,
        }
    }

    pub fn generation(&self, capability: Capability) -> GenerationParams {
        match capability {
            Capability::Chat => self.chat_generation,
            Capability::Vision => self.vision_generation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub static_dir: PathBuf,
    pub prompts: GatewayPrompts,
    pub apology: ApologyMessages,
    pub chat_chain: Vec<Provider>,
    pub vision_chain: Vec<Provider>,
    pub chat_timeout: Duration,
    pub vision_timeout: Duration,
    /// Largest decoded camera image accepted on the vision route.
    pub max_image_bytes: usize,
    pub gemini: ProviderSettings,
    pub openai: ProviderSettings,
    pub local: ProviderSettings,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reader = Reader { lookup: &lookup };

        let gemini = reader.provider(
            Provider::Gemini,
            gemini::DEFAULT_BASE_URL,
            gemini::DEFAULT_MODEL,
            gemini::DEFAULT_MODEL,
        )?;
        let openai = reader.provider(
            Provider::OpenAi,
            openai::DEFAULT_BASE_URL,
            openai::DEFAULT_CHAT_MODEL,
            openai::DEFAULT_VISION_MODEL,
        )?;
        let local = reader.provider(
            Provider::Local,
            local::DEFAULT_BASE_URL,
            local::DEFAULT_CHAT_MODEL,
            local::DEFAULT_VISION_MODEL,
        )?;

        let defaults = ApologyMessages::default();
        let prompts = GatewayPrompts::default();

        Ok(Self {
            port: reader.parse("GATEWAY_PORT", 8888)?,
            static_dir: PathBuf::from(reader.string("GATEWAY_STATIC_DIR", ".")),
            prompts: GatewayPrompts {
                persona: reader.string("GATEWAY_PERSONA", &prompts.persona),
                vision_prompt: reader.string("GATEWAY_VISION_PROMPT", &prompts.vision_prompt),
            },
            apology: ApologyMessages {
                chat: reader.string("GATEWAY_CHAT_APOLOGY", &defaults.chat),
                vision: reader.string("GATEWAY_VISION_APOLOGY", &defaults.vision),
            },
            chat_chain: reader.chain("GATEWAY_CHAT_BACKENDS", &[&gemini, &openai, &local])?,
            vision_chain: reader.chain("GATEWAY_VISION_BACKENDS", &[&gemini, &openai, &local])?,
            chat_timeout: Duration::from_secs(reader.parse("GATEWAY_CHAT_TIMEOUT_SECS", 30)?),
            vision_timeout: Duration::from_secs(reader.parse("GATEWAY_VISION_TIMEOUT_SECS", 60)?),
            max_image_bytes: reader.parse("GATEWAY_MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            gemini,
            openai,
            local,
        })
    }

    pub fn chain(&self, capability: Capability) -> &[Provider] {
        match capability {
            Capability::Chat => &self.chat_chain,
            Capability::Vision => &self.vision_chain,
        }
    }

    pub fn timeout(&self, capability: Capability) -> Duration {
        match capability {
            Capability::Chat => self.chat_timeout,
            Capability::Vision => self.vision_timeout,
        }
    }

    pub fn settings(&self, provider: Provider) -> Option<&ProviderSettings> {
        match provider {
            Provider::Gemini => Some(&self.gemini),
            Provider::OpenAi => Some(&self.openai),
            Provider::Local => Some(&self.local),
            Provider::Mock => None,
        }
    }
}

struct Reader<'a, F> {
    lookup: &'a F,
}

impl<F> Reader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_owned(),
                value,
            }),
        }
    }

    fn generation(
        &self,
        prefix: &str,
        capability: Capability,
    ) -> Result<GenerationParams, ConfigError> {
        let defaults = GenerationParams::for_capability(capability);
        let label = capability.as_str().to_ascii_uppercase();
        Ok(GenerationParams {
            max_tokens: self.parse(&format!("{prefix}_{label}_MAX_TOKENS"), defaults.max_tokens)?,
            temperature: self.parse(
                &format!("{prefix}_{label}_TEMPERATURE"),
                defaults.temperature,
            )?,
        })
    }

    fn provider(
        &self,
        provider: Provider,
        base_url: &str,
        chat_model: &str,
        vision_model: &str,
    ) -> Result<ProviderSettings, ConfigError> {
        let prefix = provider.env_prefix();
        let api_key = self.get(&format!("{prefix}_API_KEY"));
        let explicit_url = self.get(&format!("{prefix}_BASE_URL"));
        let configured = match provider {
            Provider::Local => explicit_url.is_some(),
            _ => api_key.is_some(),
        };
        let timeout = match self.get(&format!("{prefix}_TIMEOUT_SECS")) {
            None => None,
            Some(value) => Some(Duration::from_secs(value.parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: format!("{prefix}_TIMEOUT_SECS"),
                    value,
                }
            })?)),
        };

        Ok(ProviderSettings {
            provider,
            api_key,
            base_url: explicit_url.unwrap_or_else(|| base_url.to_owned()),
            chat_model: self.string(&format!("{prefix}_CHAT_MODEL"), chat_model),
            vision_model: self.string(&format!("{prefix}_VISION_MODEL"), vision_model),
            timeout,
            chat_generation: self.generation(prefix, Capability::Chat)?,
            vision_generation: self.generation(prefix, Capability::Vision)?,
            max_concurrency: self.parse(&format!("{prefix}_MAX_CONCURRENCY"), 1usize)?.max(1),
            configured,
        })
    }

    /// Explicit lists are taken as written; the default keeps configured
    /// providers in preference order.
    fn chain(
        &self,
        key: &str,
        defaults: &[&ProviderSettings],
    ) -> Result<Vec<Provider>, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(Provider::from_str)
                .collect(),
            None => Ok(defaults
                .iter()
                .filter(|settings| settings.configured)
                .map(|settings| settings.provider)
                .collect()),
        }
    }
}
