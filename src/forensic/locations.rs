//! Place extraction from segments, geocoding and proximity merging.

use crate::error::ForensicError;
use crate::forensic::config::{GeocoderKind, LocationSettings};
use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{CancelToken, ProgressSink, ProgressWindow};
use crate::forensic::segment::Segment;
use crate::forensic::structured;
use crate::forensic::util::{now_rfc3339, truncate_with_ellipsis};
use crate::provider::{CompletionRequest, ModelGateway};
use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const EXTRACTION_MAX_TOKENS: u32 = 4000;
pub const EXTRACTION_TEMPERATURE: f32 = 0.3;
/// Roughly 100 m.
pub const MERGE_TOLERANCE_DEG: f64 = 0.001;
const GEOCODER_TIMEOUT: Duration = Duration::from_secs(10);
const NOMINATIM_INTERVAL: Duration = Duration::from_millis(1500);
const GOOGLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Coordinates,
    Address,
    #[default]
    PlaceName,
    Poi,
}

impl LocationType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "coordinates" | "gps" => Self::Coordinates,
            "address" => Self::Address,
            "poi" => Self::Poi,
            _ => Self::PlaceName,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMention {
    pub segment_id: u32,
    pub location_text: String,
    pub location_type: LocationType,
    pub sender: String,
    pub timestamp: Option<String>,
    pub message_context: String,
    pub confidence_score: u8,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub fn extraction_prompt(text: &str, context_deduction: bool) -> String {
    let mut prompt = String::from(
        "Identify EVERY geographic location mentioned in the following text.\n\n\
For each location extract:\n\
- location_text: the exact text describing the place (e.g. \"10 Main Street, Springfield\")\n\
- location_type: one of coordinates, address, place_name, poi\n\
- sender: who mentioned it (sender name if available, otherwise \"Unknown\")\n\
- timestamp: date/time of the message as it appears, otherwise null\n\
- message_context: the sentence or context where the place appears (max 200 characters)\n\
- confidence_score: 0-100, how sure you are that this is a real place\n\n\
Confidence guide:\n\
- 80-100: explicit position (coordinates, full addresses)\n\
- 50-79: clearly named place (city, street, square)\n\
- 20-49: generic or ambiguous reference (\"at the bar\", \"downtown\")\n\
- 0-19: possible false positive (proper names, metaphors)\n",
    );
    if context_deduction {
        prompt.push_str(
            "\nCONTEXT DEDUCTION ENABLED:\n\
Also infer implicit places: \"going home\" refers to a home address mentioned earlier, \
\"the usual place\" to a place already discussed. \
Give deduced places a lower confidence_score (30-60) and note the deduction in message_context.\n",
        );
    }
    prompt.push_str(&format!(
        "\nReturn ONLY valid JSON in this shape:\n\
{{\"locations\": [{{\"location_text\": \"string\", \"location_type\": \"coordinates|address|place_name|poi\", \
\"sender\": \"string\", \"timestamp\": \"string or null\", \"message_context\": \"string\", \
\"confidence_score\": 0}}]}}\n\n\
TEXT TO ANALYZE:\n{text}\n\nJSON OUTPUT:"
    ));
    prompt
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn confidence_field(item: &Value) -> u8 {
    let raw = match item.get("confidence_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    };
    raw.map(|v| v.round().clamp(0.0, 100.0) as u8).unwrap_or(50)
}

/// Mentions in a model reply; entries without a location text are dropped.
pub fn parse_mentions(reply: &str, segment_id: u32) -> Vec<LocationMention> {
    structured::extract_list(reply, "locations")
        .iter()
        .filter_map(|item| {
            Some(LocationMention {
                segment_id,
                location_text: text_field(item, "location_text")?,
                location_type: text_field(item, "location_type")
                    .map(|raw| LocationType::parse(&raw))
                    .unwrap_or_default(),
                sender: text_field(item, "sender").unwrap_or_else(|| "Unknown".to_string()),
                timestamp: text_field(item, "timestamp"),
                message_context: text_field(item, "message_context")
                    .map(|ctx| truncate_with_ellipsis(&ctx, 200))
                    .unwrap_or_default(),
                confidence_score: confidence_field(item),
                lat: None,
                lon: None,
            })
        })
        .collect()
}

pub trait Geocoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum gap between two lookups.
    fn interval(&self) -> Duration;

    fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>>;
}

fn geocoder_client() -> Result<Client> {
    Client::builder()
        .timeout(GEOCODER_TIMEOUT)
        .user_agent(concat!("chatsift/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build geocoder http client")
}

pub fn parse_nominatim(json: &Value) -> Option<(f64, f64)> {
    let first = json.as_array()?.first()?;
    let coord = |key: &str| match first.get(key)? {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    Some((coord("lat")?, coord("lon")?))
}

pub fn parse_google(json: &Value) -> Result<Option<(f64, f64)>> {
    match json.get("status").and_then(Value::as_str).unwrap_or("") {
        "OK" => {
            let location = json
                .get("results")
                .and_then(Value::as_array)
                .and_then(|results| results.first())
                .and_then(|first| first.pointer("/geometry/location"));
            Ok(location.and_then(|loc| {
                Some((loc.get("lat")?.as_f64()?, loc.get("lng")?.as_f64()?))
            }))
        }
        "ZERO_RESULTS" => Ok(None),
        other => {
            let detail = json
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            Err(anyhow!("google geocoding returned {other}: {detail}"))
        }
    }
}

/// OpenStreetMap search; a `User-Agent` is mandatory.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: geocoder_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn interval(&self) -> Duration {
        NOMINATIM_INTERVAL
    }

    fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .with_context(|| format!("nominatim request failed for `{query}`"))?
            .error_for_status()
            .context("nominatim returned an error status")?;
        let json: Value = response.json().context("nominatim response is not JSON")?;
        Ok(parse_nominatim(&json))
    }
}

pub struct GoogleGeocoder {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            client: geocoder_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl Geocoder for GoogleGeocoder {
    fn name(&self) -> &'static str {
        "google"
    }

    fn interval(&self) -> Duration {
        GOOGLE_INTERVAL
    }

    fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let url = format!("{}/maps/api/geocode/json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("address", query), ("key", self.api_key.as_str())])
            .send()
            .with_context(|| format!("google geocoding request failed for `{query}`"))?
            .error_for_status()
            .context("google geocoding returned an error status")?;
        let json: Value = response
            .json()
            .context("google geocoding response is not JSON")?;
        parse_google(&json)
    }
}

pub fn build_geocoder(
    settings: &LocationSettings,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Box<dyn Geocoder>> {
    match settings.geocoder {
        GeocoderKind::Nominatim => Ok(Box::new(NominatimGeocoder::new(&settings.nominatim_url)?)),
        GeocoderKind::Google => {
            let key = lookup("GOOGLE_MAPS_API_KEY")
                .or_else(|| lookup("CHATSIFT_GOOGLE_MAPS_KEY"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ForensicError::MissingCredentials {
                    provider: "google geocoding",
                    env_var: "GOOGLE_MAPS_API_KEY",
                })?;
            Ok(Box::new(GoogleGeocoder::new(&settings.google_geocode_url, key)?))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    pub segment_id: u32,
    pub sender: String,
    pub timestamp: Option<String>,
    pub message_context: String,
    pub original_text: String,
    pub confidence_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedLocation {
    pub location_id: usize,
    pub location_text: String,
    pub lat: f64,
    pub lon: f64,
    pub location_type: LocationType,
    pub event_count: usize,
    pub events: Vec<LocationEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeFailure {
    pub location_text: String,
    pub segment_id: u32,
    pub reason: String,
}

/// Groups geocoded mentions lying within the tolerance of a group's first point on both axes.
pub fn merge_nearby(mentions: &[LocationMention]) -> Vec<UnifiedLocation> {
    let mut groups: Vec<Vec<(&LocationMention, f64, f64)>> = Vec::new();
    for mention in mentions {
        let (Some(lat), Some(lon)) = (mention.lat, mention.lon) else {
            continue;
        };
        let home = groups.iter_mut().find(|group| {
            let (_, ref_lat, ref_lon) = group[0];
            (lat - ref_lat).abs() < MERGE_TOLERANCE_DEG
                && (lon - ref_lon).abs() < MERGE_TOLERANCE_DEG
        });
        match home {
            Some(group) => group.push((mention, lat, lon)),
            None => groups.push(vec![(mention, lat, lon)]),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(idx, group)| {
            let n = group.len() as f64;
            let lat = group.iter().map(|(_, lat, _)| lat).sum::<f64>() / n;
            let lon = group.iter().map(|(_, _, lon)| lon).sum::<f64>() / n;
            let mut name = group[0].0.location_text.as_str();
            for (mention, _, _) in &group {
                if mention.location_text.chars().count() > name.chars().count() {
                    name = mention.location_text.as_str();
                }
            }
            let events: Vec<LocationEvent> = group
                .iter()
                .map(|(m, _, _)| LocationEvent {
                    segment_id: m.segment_id,
                    sender: m.sender.clone(),
                    timestamp: m.timestamp.clone(),
                    message_context: m.message_context.clone(),
                    original_text: m.location_text.clone(),
                    confidence_score: m.confidence_score,
                })
                .collect();
            UnifiedLocation {
                location_id: idx + 1,
                location_text: name.to_string(),
                lat,
                lon,
                location_type: group[0].0.location_type,
                event_count: events.len(),
                events,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationStats {
    pub segments_analyzed: usize,
    pub locations_found: usize,
    pub locations_geocoded: usize,
    pub unique_locations: usize,
    pub total_events: usize,
}

/// Contents of `reports/locations.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    pub generated_at: String,
    pub geocoder: String,
    /// Set when only the first K segments were scanned.
    pub test_segments: Option<usize>,
    pub cancelled: bool,
    pub stats: LocationStats,
    pub locations: Vec<UnifiedLocation>,
    pub geocoding_errors: Vec<GeocodeFailure>,
}

pub struct LocationAnalyzer<'a> {
    gateway: &'a dyn ModelGateway,
    geocoder: &'a dyn Geocoder,
    settings: &'a LocationSettings,
    delay: Duration,
}

impl<'a> LocationAnalyzer<'a> {
    pub fn new(
        gateway: &'a dyn ModelGateway,
        geocoder: &'a dyn Geocoder,
        settings: &'a LocationSettings,
        delay: Duration,
    ) -> Self {
        Self {
            gateway,
            geocoder,
            settings,
            delay,
        }
    }

    pub fn extract(
        &self,
        segments: &[Segment],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> Vec<LocationMention> {
        let threshold = self.settings.confidence_threshold;
        let mut out = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if idx > 0 && !self.delay.is_zero() && !cancel.sleep(self.delay) {
                break;
            }
            let prompt = extraction_prompt(&segment.text, self.settings.context_deduction);
            let request =
                CompletionRequest::text(prompt, EXTRACTION_MAX_TOKENS, EXTRACTION_TEMPERATURE);
            match self.gateway.complete(&request) {
                Ok(reply) => {
                    let found = parse_mentions(&reply, segment.id);
                    let total = found.len();
                    let kept: Vec<LocationMention> = found
                        .into_iter()
                        .filter(|m| m.confidence_score >= threshold)
                        .collect();
                    sink.log(&format!(
                        "segment {}: {} location(s), {} below confidence {threshold}",
                        segment.id,
                        kept.len(),
                        total - kept.len()
                    ));
                    out.extend(kept);
                }
                Err(err) => {
                    log::warn!("segment {}: location extraction failed: {err:#}", segment.id);
                }
            }
            sink.progress(window.at(idx + 1, segments.len()));
        }
        out
    }

    pub fn geocode(
        &self,
        mentions: &mut [LocationMention],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> Vec<GeocodeFailure> {
        let mut failures = Vec::new();
        let total = mentions.len();
        for (idx, mention) in mentions.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if idx > 0 && !cancel.sleep(self.geocoder.interval()) {
                break;
            }
            match self.geocoder.geocode(&mention.location_text) {
                Ok(Some((lat, lon))) => {
                    mention.lat = Some(lat);
                    mention.lon = Some(lon);
                }
                Ok(None) => failures.push(GeocodeFailure {
                    location_text: mention.location_text.clone(),
                    segment_id: mention.segment_id,
                    reason: "location not found by geocoding service".to_string(),
                }),
                Err(err) => failures.push(GeocodeFailure {
                    location_text: mention.location_text.clone(),
                    segment_id: mention.segment_id,
                    reason: format!("{err:#}"),
                }),
            }
            sink.progress(window.at(idx + 1, total));
        }
        sink.log(&format!(
            "geocoding: {}/{total} resolved with {}",
            mentions.iter().filter(|m| m.lat.is_some()).count(),
            self.geocoder.name()
        ));
        failures
    }

    /// Extraction over the first `limit` segments (all when `None`), then geocoding and merging.
    pub fn run(
        &self,
        segments: &[Segment],
        limit: Option<usize>,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> LocationReport {
        let scanned = match limit {
            Some(k) => &segments[..k.min(segments.len())],
            None => segments,
        };
        if let Some(k) = limit {
            sink.log(&format!(
                "test mode: scanning the first {} of {} segments",
                scanned.len(),
                segments.len()
            ));
            log::debug!("location test mode limit {k}");
        }

        let mut mentions = self.extract(scanned, cancel, sink, window.slice(0.0, 0.5));
        let failures = if mentions.is_empty() {
            Vec::new()
        } else {
            self.geocode(&mut mentions, cancel, sink, window.slice(0.5, 1.0))
        };
        let locations = merge_nearby(&mentions);
        sink.progress(window.end);

        LocationReport {
            generated_at: now_rfc3339(),
            geocoder: self.geocoder.name().to_string(),
            test_segments: limit.map(|_| scanned.len()),
            cancelled: cancel.is_cancelled(),
            stats: LocationStats {
                segments_analyzed: scanned.len(),
                locations_found: mentions.len(),
                locations_geocoded: mentions.iter().filter(|m| m.lat.is_some()).count(),
                unique_locations: locations.len(),
                total_events: locations.iter().map(|l| l.event_count).sum(),
            },
            locations,
            geocoding_errors: failures,
        }
    }
}

pub fn write_location_report(layout: &CaseLayout, report: &LocationReport) -> Result<PathBuf> {
    fs::create_dir_all(&layout.reports_dir)
        .with_context(|| format!("failed to create {}", layout.reports_dir.display()))?;
    let path = layout.locations_file();
    let data = serde_json::to_string_pretty(report)?;
    fs::write(&path, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
