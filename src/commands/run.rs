use anyhow::Result;
use std::path::PathBuf;

use crate::commands::analyze::describe_outcome;
use crate::commands::segment::{SegmentCommandOptions, segment_input};
use crate::commands::summarize::{describe_summary, effective_threshold, summarize_case};
use crate::commands::{CommandReport, connect, open_case, read_prompt_file, run_job};
use crate::forensic::analyzer::{AnalyzeOptions, SegmentAnalyzer};
use crate::forensic::config::load_config;
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::store::AnalysisStore;

#[derive(Debug, Clone)]
pub struct RunCommandOptions {
    pub segment: SegmentCommandOptions,
    pub prompt_file: Option<PathBuf>,
    pub force: bool,
    pub retry_errors: bool,
    pub threshold: Option<usize>,
    pub progress: ProgressMode,
}

/// Segment, analyze and summarize in one go. Progress: analysis 0-80%, summary 80-100%.
pub fn run(opts: &RunCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let config = loaded.config;
    let layout = open_case(&opts.segment.out)?;
    let mut report = CommandReport::new("run");

    let store = AnalysisStore::new(&layout);
    let _lock = store.lock()?;
    let (gateway, delay) = connect(&config)?;
    report.detail(format!("provider={}", gateway.kind().label()));
    report.detail(format!("model={}", gateway.model()));

    let segments = segment_input(&config, &layout, &opts.segment, &mut report)?;
    let analyze_opts = AnalyzeOptions {
        prompt: read_prompt_file(opts.prompt_file.as_deref())?,
        force: opts.force,
        retry_errors: opts.retry_errors,
        delay,
        window: ProgressWindow::new(0.0, 80.0),
    };
    let threshold = effective_threshold(&config, opts.threshold);

    let job_layout = layout.clone();
    let job_store = store.clone();
    let (outcome, summary) = run_job(&layout, opts.progress, move |sink, cancel| {
        let outcome = SegmentAnalyzer::new(gateway.as_ref(), &job_store).analyze_all(
            &segments,
            &analyze_opts,
            cancel,
            sink,
        )?;
        if outcome.cancelled {
            return Ok((outcome, None));
        }
        let summary = summarize_case(
            &job_layout,
            gateway.as_ref(),
            delay,
            &outcome.analyses,
            segments.len(),
            threshold,
            cancel,
            sink,
            ProgressWindow::new(80.0, 100.0),
        )?;
        Ok((outcome, Some(summary)))
    })?;

    describe_outcome(&layout, &outcome, &mut report);
    match summary {
        Some(summary) => describe_summary(&layout, &summary, &mut report),
        None => report.detail("summary=skipped (cancelled)".to_string()),
    }
    Ok(report)
}
