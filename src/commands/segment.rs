use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::commands::{CommandReport, open_case};
use crate::forensic::audit;
use crate::forensic::config::{ForensicConfig, load_config};
use crate::forensic::pages::load_pages;
use crate::forensic::paths::CaseLayout;
use crate::forensic::segment::{Segment, SegmentOptions, save_segments, segment_pages};

#[derive(Debug, Clone, Default)]
pub struct SegmentCommandOptions {
    pub input: PathBuf,
    pub out: PathBuf,
    pub max_chars: Option<usize>,
    pub media: bool,
    pub media_root: Option<PathBuf>,
}

/// Reads, segments and persists the export; shared with `run`.
pub fn segment_input(
    config: &ForensicConfig,
    layout: &CaseLayout,
    opts: &SegmentCommandOptions,
    report: &mut CommandReport,
) -> Result<Vec<Segment>> {
    let pages = load_pages(&opts.input)?;
    let configured_root = config.segmenter.media_root.as_deref().map(Path::new);
    let media_root = opts.media_root.as_deref().or(configured_root);
    let seg_opts = SegmentOptions {
        max_chars: opts.max_chars.unwrap_or(config.segmenter.max_chars),
        media: opts.media || config.segmenter.media || media_root.is_some(),
        media_root,
    };
    let segments = segment_pages(&pages, &seg_opts);
    let source = opts.input.display().to_string();
    save_segments(layout, &segments, &source)?;

    let media_refs: usize = segments.iter().map(|s| s.media_refs.len()).sum();
    let resolved = segments
        .iter()
        .flat_map(|s| &s.media_refs)
        .filter(|m| m.exists)
        .count();
    report.detail(format!("input={source}"));
    report.detail(format!("pages={}", pages.len()));
    report.detail(format!("segments={}", segments.len()));
    report.detail(format!("max_chars={}", seg_opts.max_chars));
    if seg_opts.media {
        report.detail(format!("media_refs={media_refs} resolved={resolved}"));
    }
    report.detail(format!("segments_dir={}", layout.segments_dir.display()));
    audit::record(
        layout,
        "segment",
        "ok",
        &format!("{} pages -> {} segments from {source}", pages.len(), segments.len()),
    );
    Ok(segments)
}

pub fn run(opts: &SegmentCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("segment");
    segment_input(&loaded.config, &layout, opts, &mut report)?;
    Ok(report)
}
