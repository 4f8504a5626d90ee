use crate::forensic::media;
use crate::forensic::progress::{CancelToken, ProgressSink, ProgressWindow};
use crate::forensic::segment::Segment;
use crate::forensic::store::{AnalysisMeta, AnalysisStore, SegmentAnalysis};
use crate::provider::{CompletionRequest, ModelGateway};
use anyhow::Result;
use std::time::Duration;

pub const SEGMENT_MAX_TOKENS: u32 = 4096;
pub const ANALYSIS_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Replaces the default forensic instructions; the segment text is appended.
    pub prompt: Option<String>,
    pub force: bool,
    pub retry_errors: bool,
    pub delay: Duration,
    pub window: ProgressWindow,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOutcome {
    pub analyses: Vec<SegmentAnalysis>,
    pub analyzed: usize,
    pub reused: usize,
    pub failed: usize,
    pub cancelled: bool,
}

enum Plan {
    Reuse(String),
    Analyze,
}

pub fn default_prompt(segment: &Segment, total: usize) -> String {
    format!(
        "You are assisting a forensic examiner. Analyze segment {id}/{total} (pages {first}-{last}) \
of a chat export extracted from a seized device and report:\n\n\
1. Participants: names, phone numbers, account identifiers\n\
2. Timeline: relevant events with dates and times\n\
3. Locations: places, addresses and coordinates mentioned\n\
4. Flagged content: threats, illegal activity or otherwise problematic messages, most severe first\n\
5. Sensitive data: documents, financial details, credentials\n\
6. Patterns: recurring behaviour, code words, changes in tone\n\n\
Be factual, quote short excerpts and cite timestamps where available.",
        id = segment.id,
        first = segment.page_range.0,
        last = segment.page_range.1,
    )
}

pub fn build_prompt(
    segment: &Segment,
    total: usize,
    custom: Option<&str>,
    image_count: usize,
) -> String {
    match custom {
        None => {
            let mut prompt = default_prompt(segment, total);
            if image_count > 0 {
                prompt.push_str(&format!(
                    "\n\nIMPORTANT: this segment comes with {image_count} attached image(s). \
Analyze their visual content together with the text."
                ));
            }
            format!(
                "{prompt}\n\nSegment text:\n{}\n\nProvide a structured, clear analysis.",
                segment.text
            )
        }
        Some(custom) => {
            let mut prompt = format!(
                "{}\n\nSegment {}/{}:\n{}",
                custom.trim_end(),
                segment.id,
                total,
                segment.text
            );
            if image_count > 0 {
                prompt.push_str(&format!(
                    "\n\n[This segment includes {image_count} image(s) to analyze]"
                ));
            }
            prompt
        }
    }
}

/// Drives the gateway over segments in order, one request at a time.
pub struct SegmentAnalyzer<'a> {
    gateway: &'a dyn ModelGateway,
    store: &'a AnalysisStore,
}

impl<'a> SegmentAnalyzer<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, store: &'a AnalysisStore) -> Self {
        Self { gateway, store }
    }

    fn plan(&self, segment: &Segment, opts: &AnalyzeOptions) -> Result<Plan> {
        if opts.force {
            return Ok(Plan::Analyze);
        }
        let Some(text) = self.store.read(segment.id)? else {
            return Ok(Plan::Analyze);
        };
        match self.store.read_meta(segment.id) {
            Some(meta) if meta.fingerprint != segment.fingerprint => {
                log::warn!(
                    "segment {} changed since its analysis was written; re-analyzing",
                    segment.id
                );
                Ok(Plan::Analyze)
            }
            Some(meta) if meta.failed && opts.retry_errors => Ok(Plan::Analyze),
            _ => Ok(Plan::Reuse(text)),
        }
    }

    fn analyze_one(
        &self,
        segment: &Segment,
        total: usize,
        opts: &AnalyzeOptions,
        sink: &dyn ProgressSink,
    ) -> Result<String> {
        let images = match media::load_image_attachments(&segment.media_refs) {
            Ok(images) => images,
            Err(err) => {
                log::warn!("segment {}: images skipped: {err:#}", segment.id);
                Vec::new()
            }
        };
        if !images.is_empty() {
            sink.log(&format!(
                "segment {}: sending {} image(s) to {}",
                segment.id,
                images.len(),
                self.gateway.kind().display_name()
            ));
        }
        let prompt = build_prompt(segment, total, opts.prompt.as_deref(), images.len());
        let request = CompletionRequest::text(prompt, SEGMENT_MAX_TOKENS, ANALYSIS_TEMPERATURE)
            .with_images(images);
        self.gateway.complete(&request)
    }

    /// Stops at the first cancelled check; everything written before that stays valid.
    pub fn analyze_all(
        &self,
        segments: &[Segment],
        opts: &AnalyzeOptions,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<AnalyzeOutcome> {
        let total = segments.len();
        let mut outcome = AnalyzeOutcome::default();
        let mut called_before = false;

        for (idx, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let text = match self.plan(segment, opts)? {
                Plan::Reuse(text) => {
                    outcome.reused += 1;
                    text
                }
                Plan::Analyze => {
                    if called_before && !opts.delay.is_zero() {
                        sink.log(&format!(
                            "waiting {:.1}s (rate limit)",
                            opts.delay.as_secs_f64()
                        ));
                        if !cancel.sleep(opts.delay) {
                            outcome.cancelled = true;
                            break;
                        }
                    }
                    sink.log(&format!("analyzing segment {}/{total}", segment.id));
                    called_before = true;

                    let (text, failed) = match self.analyze_one(segment, total, opts, sink) {
                        Ok(text) => (text, false),
                        Err(err) => {
                            log::warn!("segment {} failed: {err:#}", segment.id);
                            (
                                format!("ERROR analyzing segment {}: {err:#}", segment.id),
                                true,
                            )
                        }
                    };
                    let meta = AnalysisMeta {
                        segment_id: segment.id,
                        fingerprint: segment.fingerprint.clone(),
                        provider: self.gateway.kind().label().to_string(),
                        model: self.gateway.model().to_string(),
                        failed,
                        written_at: String::new(),
                    };
                    self.store.write(segment.id, &text, &meta)?;
                    outcome.analyzed += 1;
                    if failed {
                        outcome.failed += 1;
                    }
                    text
                }
            };

            outcome.analyses.push(SegmentAnalysis {
                segment_id: segment.id,
                text,
            });
            sink.progress(opts.window.at(idx + 1, total));
        }

        sink.log(&format!(
            "analysis finished: {} analyzed, {} reused, {} failed{}",
            outcome.analyzed,
            outcome.reused,
            outcome.failed,
            if outcome.cancelled { ", cancelled" } else { "" }
        ));
        Ok(outcome)
    }
}
