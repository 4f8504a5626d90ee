use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::summarize::effective_threshold;
use crate::commands::{CommandReport, connect, open_case, run_job};
use crate::forensic::audit;
use crate::forensic::config::load_config;
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::segment::load_segments;
use crate::forensic::store::AnalysisStore;
use crate::forensic::summarize::{HierarchicalSummarizer, SearchBrief, SummaryPath};
use crate::forensic::util::{now_rfc3339, slugify};

const SLUG_MAX_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct SearchCommandOptions {
    pub out: PathBuf,
    pub query: String,
    pub threshold: Option<usize>,
    pub progress: ProgressMode,
}

pub fn run(opts: &SearchCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("search");

    let query = opts.query.trim().to_string();
    if query.is_empty() {
        report.issue("query cannot be empty");
        return Ok(report);
    }
    let segments = load_segments(&layout)?;
    let (analyses, _) = AnalysisStore::new(&layout).load_current(&segments)?;
    if analyses.is_empty() {
        report.issue("no analyses found; run `chatsift analyze` first");
        return Ok(report);
    }
    let threshold = effective_threshold(&loaded.config, opts.threshold);
    let (gateway, delay) = connect(&loaded.config)?;

    let job_query = query.clone();
    let summary = run_job(&layout, opts.progress, move |sink, cancel| {
        Ok(HierarchicalSummarizer::new(gateway.as_ref(), delay).summarize(
            &analyses,
            threshold,
            &SearchBrief { query: &job_query },
            cancel,
            sink,
            ProgressWindow::default(),
        ))
    })?;

    let path = layout.search_file(&slugify(&query, SLUG_MAX_LEN));
    let approach = match summary.path {
        SummaryPath::Flat => "flat".to_string(),
        SummaryPath::Hierarchical { groups } => format!("hierarchical ({groups} groups)"),
    };
    let body = format!(
        "# Search: {query}\n\n- generated: {}\n- analyses: {}\n- approach: {approach}\n\n{}\n",
        now_rfc3339(),
        summary.analysis_count,
        summary.body.trim_end()
    );
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;

    report.detail(format!("query={query}"));
    report.detail(format!("analyses={}", summary.analysis_count));
    report.detail(format!("approach={approach}"));
    report.detail(format!("result={}", path.display()));
    if summary.failed && !summary.cancelled {
        report.issue("final aggregation failed; partial group results were written");
    }
    audit::record(
        &layout,
        "search",
        if summary.failed { "failed" } else { "ok" },
        &query,
    );
    Ok(report)
}
