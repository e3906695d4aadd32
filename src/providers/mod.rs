use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

mod claude;
mod openai;
mod retry;

pub use claude::Claude;
pub use openai::OpenAI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: StatusCode,
        message: String,
    },
    #[error("malformed {provider} response: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },
}

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>>;

/// A translation service reachable with one prompt per request.
///
/// The reply is returned as opaque text; deciding whether it holds the
/// expected JSON array is up to the caller.
pub trait Backend: Send + Sync {
    /// Identifier recorded as the author of produced translations.
    fn model_id(&self) -> &str;
    fn send(&self, prompt: String) -> BackendFuture<'_>;
}

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum BackendImpl {
    OpenAI(OpenAI),
    Claude(Claude),
}

impl Backend for BackendImpl {
    fn model_id(&self) -> &str {
        match self {
            BackendImpl::OpenAI(backend) => backend.model_id(),
            BackendImpl::Claude(backend) => backend.model_id(),
        }
    }

    fn send(&self, prompt: String) -> BackendFuture<'_> {
        match self {
            BackendImpl::OpenAI(backend) => backend.send(prompt),
            BackendImpl::Claude(backend) => backend.send(prompt),
        }
    }
}

pub fn build_backend(
    provider: ProviderKind,
    key: String,
    model: Option<String>,
    options: HttpOptions,
) -> BackendImpl {
    match provider {
        ProviderKind::OpenAI => {
            let mut backend = OpenAI::new(key, options);
            if let Some(model) = model {
                backend = backend.with_model(model);
            }
            BackendImpl::OpenAI(backend)
        }
        ProviderKind::Claude => {
            let mut backend = Claude::new(key, options);
            if let Some(model) = model {
                backend = backend.with_model(model);
            }
            BackendImpl::Claude(backend)
        }
    }
}

/// Resolves the provider from `--model` (`provider` or `provider:model`),
/// falling back to the configured provider and model.
pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    default_provider: &str,
    default_model: Option<&str>,
) -> Result<ProviderSelection> {
    match model_arg {
        Some(model) => parse_model_arg(model),
        None => {
            let provider = provider_from_name(&default_provider.trim().to_lowercase())
                .ok_or_else(|| anyhow!("unknown provider '{}' in settings", default_provider))?;
            Ok(ProviderSelection {
                provider,
                requested_model: default_model.map(str::to_string),
            })
        }
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key
        && !key.trim().is_empty()
    {
        return Ok(key.trim().to_string());
    }

    match provider {
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
        ProviderKind::Claude => get_env("ANTHROPIC_API_KEY"),
    }
    .ok_or_else(|| {
        anyhow!(
            "API key not found for provider '{}' (set {} or pass --key)",
            provider.as_str(),
            key_env_name(provider)
        )
    })
}

fn key_env_name(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAI => "OPENAI_API_KEY",
        ProviderKind::Claude => "ANTHROPIC_API_KEY",
    }
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    if raw.is_empty() {
        return Err(anyhow!("model argument is empty"));
    }

    if let Some(provider) = provider_from_name(&raw.to_lowercase()) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider, model)) = parse_provider_model_pair(raw) {
        return Ok(ProviderSelection {
            provider,
            requested_model: model,
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (openai:, claude:)",
        raw
    ))
}

fn parse_provider_model_pair(input: &str) -> Option<(ProviderKind, Option<String>)> {
    let (provider_part, model_part) = input.split_once(':')?;
    let provider = provider_from_name(&provider_part.to_lowercase())?;
    let model = if model_part.trim().is_empty() {
        None
    } else {
        Some(model_part.trim().to_string())
    };
    Some((provider, model))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "openai" => Some(ProviderKind::OpenAI),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        _ => None,
    }
}

pub(crate) fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
