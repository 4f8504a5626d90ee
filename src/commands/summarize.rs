use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::{CommandReport, connect, open_case, run_job};
use crate::forensic::audit;
use crate::forensic::config::{ForensicConfig, load_config};
use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{CancelToken, ProgressMode, ProgressSink, ProgressWindow};
use crate::forensic::segment::load_segments;
use crate::forensic::store::{AnalysisStore, SegmentAnalysis};
use crate::forensic::summarize::{
    DocumentBrief, FinalSummary, HierarchicalSummarizer, SummaryPath, write_final_summary,
};
use crate::provider::ModelGateway;

#[derive(Debug, Clone)]
pub struct SummarizeCommandOptions {
    pub out: PathBuf,
    pub threshold: Option<usize>,
    pub progress: ProgressMode,
}

pub fn effective_threshold(config: &ForensicConfig, requested: Option<usize>) -> usize {
    requested
        .filter(|t| *t > 0)
        .unwrap_or(config.summary.hierarchical_threshold)
}

/// Final case report over `analyses`, written to `reports/`.
#[allow(clippy::too_many_arguments)]
pub fn summarize_case(
    layout: &CaseLayout,
    gateway: &dyn ModelGateway,
    delay: Duration,
    analyses: &[SegmentAnalysis],
    total_segments: usize,
    threshold: usize,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
    window: ProgressWindow,
) -> Result<FinalSummary> {
    let summary = HierarchicalSummarizer::new(gateway, delay).summarize(
        analyses,
        threshold,
        &DocumentBrief { total_segments },
        cancel,
        sink,
        window,
    );
    write_final_summary(layout, &summary, total_segments)?;
    Ok(summary)
}

pub fn describe_summary(layout: &CaseLayout, summary: &FinalSummary, report: &mut CommandReport) {
    let approach = match summary.path {
        SummaryPath::Flat => "flat".to_string(),
        SummaryPath::Hierarchical { groups } => format!("hierarchical groups={groups}"),
    };
    report.detail(format!("analyses={}", summary.analysis_count));
    report.detail(format!("approach={approach}"));
    report.detail(format!("final_summary={}", layout.final_summary_file().display()));
    if !summary.group_summaries.is_empty() {
        report.detail(format!(
            "group_summaries={}",
            layout.group_summaries_file().display()
        ));
    }
    if summary.cancelled {
        report.detail("cancelled=true".to_string());
    } else if summary.failed {
        report.issue("final aggregation failed; the error-flagged summary was written instead");
    }
    let status = match (summary.cancelled, summary.failed) {
        (true, _) => "cancelled",
        (false, true) => "failed",
        (false, false) => "ok",
    };
    audit::record(layout, "summarize", status, &approach);
}

pub fn run(opts: &SummarizeCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("summarize");

    let segments = load_segments(&layout)?;
    let (analyses, missing) = AnalysisStore::new(&layout).load_current(&segments)?;
    if analyses.is_empty() {
        report.issue("no analyses found; run `chatsift analyze` first");
        return Ok(report);
    }
    if !missing.is_empty() {
        log::warn!(
            "{} segment(s) have no current analysis; run `chatsift analyze` to fill them in",
            missing.len()
        );
        report.detail(format!("segments_without_analysis={}", missing.len()));
    }
    let total_segments = segments.len();
    let threshold = effective_threshold(&loaded.config, opts.threshold);
    let (gateway, delay) = connect(&loaded.config)?;

    let job_layout = layout.clone();
    let summary = run_job(&layout, opts.progress, move |sink, cancel| {
        summarize_case(
            &job_layout,
            gateway.as_ref(),
            delay,
            &analyses,
            total_segments,
            threshold,
            cancel,
            sink,
            ProgressWindow::default(),
        )
    })?;

    describe_summary(&layout, &summary, &mut report);
    Ok(report)
}
