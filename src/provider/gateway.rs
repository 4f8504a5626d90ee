use crate::error::ForensicError;
use crate::forensic::config::ProviderSettings;
use crate::provider::backends::{AnthropicBackend, LocalBackend, OpenAiBackend};
use anyhow::{Result, anyhow};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Local => "Local model",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic Claude",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub filename: String,
    pub mime_type: String,
    pub base64_data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub images: Vec<ImageAttachment>,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>, max_output_tokens: u32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens,
            temperature,
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

/// One synchronous completion capability; callers never branch on the backend.
pub trait ModelGateway: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn complete_text(
        &self,
        prompt: &str,
        max_output_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        self.complete(&CompletionRequest::text(prompt, max_output_tokens, temperature))
    }

    /// Fails fast on configuration problems before any segment work begins.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn parse_provider_alias(raw: &str) -> Option<ProviderKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" | "ollama" => Some(ProviderKind::Local),
        "openai" | "gpt" => Some(ProviderKind::OpenAi),
        "anthropic" | "claude" => Some(ProviderKind::Anthropic),
        _ => None,
    }
}

pub fn parse_prefixed_model(raw: &str) -> (Option<ProviderKind>, String) {
    let trimmed = raw.trim();
    if let Some((prefix, model)) = trimmed.split_once(':')
        && let Some(provider) = parse_provider_alias(prefix)
    {
        return (Some(provider), model.trim().to_string());
    }
    (None, trimmed.to_string())
}

pub fn infer_provider_from_model(model: &str) -> Option<ProviderKind> {
    let lower = model.trim().to_ascii_lowercase();
    if lower.contains("claude") {
        return Some(ProviderKind::Anthropic);
    }
    if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        return Some(ProviderKind::OpenAi);
    }
    None
}

fn default_model_for_provider(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Local => "llama3.1",
        ProviderKind::OpenAi => "gpt-4o",
        ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
    }
}

fn resolve_api_key(
    provider: ProviderKind,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    match provider {
        ProviderKind::Local => None,
        ProviderKind::OpenAi => {
            non_empty(lookup("OPENAI_API_KEY")).or_else(|| non_empty(lookup("CHATSIFT_API_KEY")))
        }
        ProviderKind::Anthropic => non_empty(lookup("ANTHROPIC_API_KEY"))
            .or_else(|| non_empty(lookup("CHATSIFT_API_KEY"))),
    }
}

fn first_available_provider(lookup: &dyn Fn(&str) -> Option<String>) -> Option<ProviderKind> {
    if non_empty(lookup("OPENAI_API_KEY")).is_some() {
        return Some(ProviderKind::OpenAi);
    }
    if non_empty(lookup("ANTHROPIC_API_KEY")).is_some() {
        return Some(ProviderKind::Anthropic);
    }
    None
}

pub fn resolve_provider(
    settings: &ProviderSettings,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedProvider> {
    let explicit = match settings.kind.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_provider_alias(raw).ok_or_else(|| {
            anyhow!(ForensicError::InvalidConfig(format!(
                "unknown provider `{raw}`; use local, openai or anthropic"
            )))
        })?),
        _ => None,
    };

    let (prefixed, mut model) = settings
        .model
        .as_deref()
        .map(parse_prefixed_model)
        .unwrap_or((None, String::new()));

    let kind = explicit
        .or(prefixed)
        .or_else(|| infer_provider_from_model(&model))
        .or_else(|| first_available_provider(lookup))
        .unwrap_or(ProviderKind::Local);

    if model.is_empty() {
        model = default_model_for_provider(kind).to_string();
    }

    let api_key = resolve_api_key(kind, lookup);
    match kind {
        ProviderKind::OpenAi if api_key.is_none() => {
            return Err(anyhow!(ForensicError::MissingCredentials {
                provider: "openai",
                env_var: "OPENAI_API_KEY",
            }));
        }
        ProviderKind::Anthropic if api_key.is_none() => {
            return Err(anyhow!(ForensicError::MissingCredentials {
                provider: "anthropic",
                env_var: "ANTHROPIC_API_KEY",
            }));
        }
        _ => {}
    }

    Ok(ResolvedProvider {
        kind,
        model,
        api_key,
    })
}

/// Resolves the backend once; the returned gateway is the only thing pipelines see.
pub fn build_gateway(settings: &ProviderSettings) -> Result<Box<dyn ModelGateway>> {
    let resolved = resolve_provider(settings, &|var| env::var(var).ok())?;
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let api_key = resolved.api_key.unwrap_or_default();

    let gateway: Box<dyn ModelGateway> = match resolved.kind {
        ProviderKind::Local => Box::new(LocalBackend::new(
            &settings.local_url,
            resolved.model,
            timeout,
        )?),
        ProviderKind::OpenAi => Box::new(OpenAiBackend::new(
            &settings.openai_base_url,
            resolved.model,
            api_key,
            timeout,
        )?),
        ProviderKind::Anthropic => Box::new(AnthropicBackend::new(
            &settings.anthropic_base_url,
            resolved.model,
            api_key,
            timeout,
        )?),
    };
    log::debug!(
        "model gateway resolved provider={} model={}",
        gateway.kind().label(),
        gateway.model()
    );
    Ok(gateway)
}
