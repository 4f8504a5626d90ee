use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, connect, open_case, read_prompt_file, run_job};
use crate::forensic::analyzer::{AnalyzeOptions, AnalyzeOutcome, SegmentAnalyzer};
use crate::forensic::audit;
use crate::forensic::config::load_config;
use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::segment::load_segments;
use crate::forensic::store::AnalysisStore;

#[derive(Debug, Clone)]
pub struct AnalyzeCommandOptions {
    pub out: PathBuf,
    pub prompt_file: Option<PathBuf>,
    pub force: bool,
    pub retry_errors: bool,
    pub progress: ProgressMode,
}

pub fn describe_outcome(layout: &CaseLayout, outcome: &AnalyzeOutcome, report: &mut CommandReport) {
    report.detail(format!("analyzed={}", outcome.analyzed));
    report.detail(format!("reused={}", outcome.reused));
    report.detail(format!("failed={}", outcome.failed));
    report.detail(format!("analyses_dir={}", layout.analyses_dir.display()));
    if outcome.failed > 0 {
        report.detail("hint=rerun with --retry-errors to retry failed segments".to_string());
    }
    if outcome.cancelled {
        report.detail("cancelled=true".to_string());
    }
    let status = if outcome.cancelled { "cancelled" } else { "ok" };
    audit::record(
        layout,
        "analyze",
        status,
        &format!(
            "{} analyzed, {} reused, {} failed",
            outcome.analyzed, outcome.reused, outcome.failed
        ),
    );
}

pub fn run(opts: &AnalyzeCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("analyze");

    let segments = load_segments(&layout)?;
    let store = AnalysisStore::new(&layout);
    let _lock = store.lock()?;
    let (gateway, delay) = connect(&loaded.config)?;
    report.detail(format!("provider={}", gateway.kind().label()));
    report.detail(format!("model={}", gateway.model()));

    let analyze_opts = AnalyzeOptions {
        prompt: read_prompt_file(opts.prompt_file.as_deref())?,
        force: opts.force,
        retry_errors: opts.retry_errors,
        delay,
        window: ProgressWindow::default(),
    };
    let job_store = store.clone();
    let outcome = run_job(&layout, opts.progress, move |sink, cancel| {
        SegmentAnalyzer::new(gateway.as_ref(), &job_store).analyze_all(
            &segments,
            &analyze_opts,
            cancel,
            sink,
        )
    })?;

    describe_outcome(&layout, &outcome, &mut report);
    Ok(report)
}
