use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::commands::analyze::describe_outcome;
use crate::commands::summarize::{describe_summary, effective_threshold, summarize_case};
use crate::commands::{CommandReport, connect, open_case, read_prompt_file, run_job};
use crate::forensic::analyzer::{AnalyzeOptions, SegmentAnalyzer};
use crate::forensic::config::load_config;
use crate::forensic::filter::KeywordFilter;
use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::segment::{load_segments, save_segments};
use crate::forensic::store::AnalysisStore;

#[derive(Debug, Clone)]
pub struct ReanalyzeCommandOptions {
    pub out: PathBuf,
    pub keywords: String,
    pub match_all: bool,
    pub max_segments: usize,
    pub prompt_file: PathBuf,
    pub threshold: Option<usize>,
    pub progress: ProgressMode,
}

#[derive(Debug, Serialize)]
struct Selection<'a> {
    keywords: &'a [String],
    mode: &'a str,
    max_segments: usize,
    segment_ids: Vec<u32>,
    prompt: &'a str,
}

/// Targeted pass: keyword-selected segments analyzed with a custom prompt into
/// `reanalysis_<timestamp>/`, leaving the case's own analyses untouched.
pub fn run(opts: &ReanalyzeCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("reanalyze");

    let filter = KeywordFilter::new(&opts.keywords, opts.match_all, opts.max_segments);
    if filter.is_empty() {
        report.issue("no keywords given; pass a comma-separated list");
        return Ok(report);
    }
    let prompt = read_prompt_file(Some(&opts.prompt_file))?.unwrap_or_default();
    let segments = load_segments(&layout)?;
    let selected = filter.select(&segments);
    report.detail(format!("keywords={}", filter.keywords().join(",")));
    report.detail(format!("selected={}/{}", selected.len(), segments.len()));
    if selected.is_empty() {
        report.detail("no segment matched the keywords; nothing to analyze".to_string());
        return Ok(report);
    }

    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let sub = open_case(&layout.root.join(format!("reanalysis_{stamp}")))?;
    save_segments(&sub, &selected, &layout.segments_dir.display().to_string())?;
    let selection = Selection {
        keywords: filter.keywords(),
        mode: if opts.match_all { "all" } else { "any" },
        max_segments: opts.max_segments,
        segment_ids: selected.iter().map(|s| s.id).collect(),
        prompt: &prompt,
    };
    let selection_path = sub.root.join("selection.json");
    fs::write(&selection_path, serde_json::to_string_pretty(&selection)?)
        .with_context(|| format!("failed to write {}", selection_path.display()))?;

    let store = AnalysisStore::new(&sub);
    let _lock = store.lock()?;
    let (gateway, delay) = connect(&loaded.config)?;
    let analyze_opts = AnalyzeOptions {
        prompt: Some(prompt.clone()),
        force: true,
        retry_errors: false,
        delay,
        window: ProgressWindow::new(0.0, 80.0),
    };
    let threshold = effective_threshold(&loaded.config, opts.threshold);

    let job_sub: CaseLayout = sub.clone();
    let job_store = store.clone();
    let (outcome, summary) = run_job(&layout, opts.progress, move |sink, cancel| {
        let outcome = SegmentAnalyzer::new(gateway.as_ref(), &job_store).analyze_all(
            &selected,
            &analyze_opts,
            cancel,
            sink,
        )?;
        if outcome.cancelled || outcome.analyses.is_empty() {
            return Ok((outcome, None));
        }
        let summary = summarize_case(
            &job_sub,
            gateway.as_ref(),
            delay,
            &outcome.analyses,
            selected.len(),
            threshold,
            cancel,
            sink,
            ProgressWindow::new(80.0, 100.0),
        )?;
        Ok((outcome, Some(summary)))
    })?;

    report.detail(format!("reanalysis_dir={}", sub.root.display()));
    describe_outcome(&sub, &outcome, &mut report);
    if let Some(summary) = summary {
        describe_summary(&sub, &summary, &mut report);
    }
    Ok(report)
}
