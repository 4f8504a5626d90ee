use crate::error::ForensicError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// `local`, `openai` or `anthropic`; inferred from the model and keys when unset.
    pub kind: Option<String>,
    pub model: Option<String>,
    pub local_url: String,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: None,
            model: None,
            local_url: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub openai_tpm: u64,
    pub anthropic_tpm: u64,
    pub local_delay_ms: u64,
    pub estimated_tokens_per_request: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            openai_tpm: 30_000,
            anthropic_tpm: 40_000,
            local_delay_ms: 500,
            estimated_tokens_per_request: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    pub max_chars: usize,
    pub media: bool,
    pub media_root: Option<String>,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            max_chars: 15_000,
            media: false,
            media_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub hierarchical_threshold: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            hierarchical_threshold: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    #[default]
    Pattern,
    Llm,
}

impl DetectionStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pattern" | "regex" => Some(Self::Pattern),
            "llm" | "ai" | "model" => Some(Self::Llm),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Llm => "llm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub strategy: DetectionStrategy,
    pub overlap_chars: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::Pattern,
            overlap_chars: 2_000,
        }
    }
}

/// Empirical thresholds for the chat equivalence cascade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub jaccard_threshold: f64,
    pub subset_threshold: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            jaccard_threshold: 0.8,
            subset_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeocoderKind {
    #[default]
    Nominatim,
    Google,
}

impl GeocoderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nominatim" | "osm" | "openstreetmap" => Some(Self::Nominatim),
            "google" | "google-maps" => Some(Self::Google),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    pub confidence_threshold: u8,
    pub geocoder: GeocoderKind,
    pub context_deduction: bool,
    pub nominatim_url: String,
    pub google_geocode_url: String,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 50,
            geocoder: GeocoderKind::Nominatim,
            context_deduction: false,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            google_geocode_url: "https://maps.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForensicConfig {
    pub provider: ProviderSettings,
    pub rate_limit: RateLimitSettings,
    pub segmenter: SegmenterSettings,
    pub summary: SummarySettings,
    pub detection: DetectionSettings,
    pub dedup: DedupSettings,
    pub locations: LocationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialForensicConfig {
    provider: Option<ProviderSettings>,
    rate_limit: Option<RateLimitSettings>,
    segmenter: Option<SegmenterSettings>,
    summary: Option<SummarySettings>,
    detection: Option<DetectionSettings>,
    dedup: Option<DedupSettings>,
    locations: Option<LocationSettings>,
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or_u64(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: u64) -> u64 {
    non_empty(lookup(var))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn env_or_usize(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: usize) -> usize {
    non_empty(lookup(var))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(fallback)
}

fn env_or_f64(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: f64) -> f64 {
    non_empty(lookup(var))
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(fallback)
}

fn env_or_bool(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: bool) -> bool {
    match non_empty(lookup(var)).as_deref() {
        Some("1" | "true" | "TRUE" | "yes" | "on") => true,
        Some("0" | "false" | "FALSE" | "no" | "off") => false,
        _ => fallback,
    }
}

fn env_or_string(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: &str) -> String {
    non_empty(lookup(var)).unwrap_or_else(|| fallback.to_string())
}

pub fn validate(cfg: &ForensicConfig) -> Result<()> {
    let invalid = |msg: &str| -> Result<()> {
        Err(anyhow!(ForensicError::InvalidConfig(msg.to_string())))
    };

    if cfg.rate_limit.openai_tpm == 0 || cfg.rate_limit.anthropic_tpm == 0 {
        return invalid("rate_limit tpm budgets must be >= 1");
    }
    if cfg.rate_limit.estimated_tokens_per_request == 0 {
        return invalid("rate_limit.estimated_tokens_per_request must be >= 1");
    }
    if cfg.segmenter.max_chars == 0 {
        return invalid("segmenter.max_chars must be >= 1");
    }
    if cfg.summary.hierarchical_threshold == 0 {
        return invalid("summary.hierarchical_threshold must be >= 1");
    }
    if cfg.provider.request_timeout_secs == 0 {
        return invalid("provider.request_timeout_secs must be >= 1");
    }
    let j = cfg.dedup.jaccard_threshold;
    let s = cfg.dedup.subset_threshold;
    if !(j > 0.0 && j <= 1.0) || !(s > 0.0 && s <= 1.0) {
        return invalid("dedup thresholds must be in (0, 1]");
    }
    if cfg.locations.confidence_threshold > 100 {
        return invalid("locations.confidence_threshold must be in 0..=100");
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("CHATSIFT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".chatsift").join("chatsift.toml"))
}

fn merge_toml(base: &mut ForensicConfig, raw: &str) -> Result<()> {
    let parsed: PartialForensicConfig = toml::from_str(raw)?;
    if let Some(provider) = parsed.provider {
        base.provider = provider;
    }
    if let Some(rate_limit) = parsed.rate_limit {
        base.rate_limit = rate_limit;
    }
    if let Some(segmenter) = parsed.segmenter {
        base.segmenter = segmenter;
    }
    if let Some(summary) = parsed.summary {
        base.summary = summary;
    }
    if let Some(detection) = parsed.detection {
        base.detection = detection;
    }
    if let Some(dedup) = parsed.dedup {
        base.dedup = dedup;
    }
    if let Some(locations) = parsed.locations {
        base.locations = locations;
    }
    Ok(())
}

fn merge_file_config(base: &mut ForensicConfig) -> Result<Option<PathBuf>> {
    let Some(path) = resolve_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path).map_err(|err| {
        anyhow!(ForensicError::InvalidConfig(format!(
            "{}: {err}",
            path.display()
        )))
    })?;
    merge_toml(base, &raw).map_err(|err| {
        anyhow!(ForensicError::InvalidConfig(format!(
            "{}: {err}",
            path.display()
        )))
    })?;
    Ok(Some(path))
}

fn apply_env_overrides(cfg: &mut ForensicConfig, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(kind) = non_empty(lookup("CHATSIFT_PROVIDER")) {
        cfg.provider.kind = Some(kind);
    }
    if let Some(model) = non_empty(lookup("CHATSIFT_MODEL")) {
        cfg.provider.model = Some(model);
    }
    cfg.provider.local_url = env_or_string(lookup, "CHATSIFT_LOCAL_URL", &cfg.provider.local_url);
    cfg.provider.openai_base_url = env_or_string(
        lookup,
        "CHATSIFT_OPENAI_BASE_URL",
        &cfg.provider.openai_base_url,
    );
    cfg.provider.anthropic_base_url = env_or_string(
        lookup,
        "CHATSIFT_ANTHROPIC_BASE_URL",
        &cfg.provider.anthropic_base_url,
    );
    cfg.provider.request_timeout_secs = env_or_u64(
        lookup,
        "CHATSIFT_REQUEST_TIMEOUT_SECS",
        cfg.provider.request_timeout_secs,
    );

    cfg.rate_limit.openai_tpm =
        env_or_u64(lookup, "CHATSIFT_OPENAI_TPM", cfg.rate_limit.openai_tpm);
    cfg.rate_limit.anthropic_tpm =
        env_or_u64(lookup, "CHATSIFT_ANTHROPIC_TPM", cfg.rate_limit.anthropic_tpm);
    cfg.rate_limit.local_delay_ms =
        env_or_u64(lookup, "CHATSIFT_LOCAL_DELAY_MS", cfg.rate_limit.local_delay_ms);

    cfg.segmenter.max_chars =
        env_or_usize(lookup, "CHATSIFT_MAX_SEGMENT_CHARS", cfg.segmenter.max_chars);
    cfg.segmenter.media = env_or_bool(lookup, "CHATSIFT_MEDIA", cfg.segmenter.media);
    if let Some(root) = non_empty(lookup("CHATSIFT_MEDIA_ROOT")) {
        cfg.segmenter.media_root = Some(root);
    }

    cfg.summary.hierarchical_threshold = env_or_usize(
        lookup,
        "CHATSIFT_HIERARCHICAL_THRESHOLD",
        cfg.summary.hierarchical_threshold,
    );

    if let Some(strategy) =
        non_empty(lookup("CHATSIFT_DETECTION_STRATEGY")).and_then(|v| DetectionStrategy::parse(&v))
    {
        cfg.detection.strategy = strategy;
    }
    cfg.detection.overlap_chars =
        env_or_usize(lookup, "CHATSIFT_OVERLAP_CHARS", cfg.detection.overlap_chars);

    cfg.dedup.jaccard_threshold =
        env_or_f64(lookup, "CHATSIFT_DEDUP_JACCARD", cfg.dedup.jaccard_threshold);
    cfg.dedup.subset_threshold =
        env_or_f64(lookup, "CHATSIFT_DEDUP_SUBSET", cfg.dedup.subset_threshold);

    cfg.locations.confidence_threshold = env_or_u64(
        lookup,
        "CHATSIFT_LOCATION_CONFIDENCE",
        u64::from(cfg.locations.confidence_threshold),
    )
    .min(u64::from(u8::MAX)) as u8;
    if let Some(geocoder) =
        non_empty(lookup("CHATSIFT_GEOCODER")).and_then(|v| GeocoderKind::parse(&v))
    {
        cfg.locations.geocoder = geocoder;
    }
    cfg.locations.context_deduction = env_or_bool(
        lookup,
        "CHATSIFT_CONTEXT_DEDUCTION",
        cfg.locations.context_deduction,
    );
    cfg.locations.nominatim_url =
        env_or_string(lookup, "CHATSIFT_NOMINATIM_URL", &cfg.locations.nominatim_url);
    cfg.locations.google_geocode_url = env_or_string(
        lookup,
        "CHATSIFT_GOOGLE_GEOCODE_URL",
        &cfg.locations.google_geocode_url,
    );
}

/// Loaded once per command; pipelines receive it by reference and never re-read it mid-run.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ForensicConfig,
    pub source: Option<PathBuf>,
}

pub fn load_config() -> Result<LoadedConfig> {
    let mut config = ForensicConfig::default();
    let source = merge_file_config(&mut config)?;
    apply_env_overrides(&mut config, &|var| env::var(var).ok());
    validate(&config)?;
    Ok(LoadedConfig { config, source })
}
