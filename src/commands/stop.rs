use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::forensic::audit;
use crate::forensic::paths::CaseLayout;
use crate::forensic::util::now_rfc3339;

#[derive(Debug, Clone)]
pub struct StopCommandOptions {
    pub out: PathBuf,
}

/// Asks a running pipeline on this case to stop after its current model call.
pub fn run(opts: &StopCommandOptions) -> Result<CommandReport> {
    let layout = CaseLayout::new(&opts.out);
    let mut report = CommandReport::new("stop");
    if !layout.root.exists() {
        report.issue(format!("case directory {} does not exist", layout.root.display()));
        return Ok(report);
    }
    let already = layout.stop_requested();
    fs::write(&layout.stop_file, format!("{}\n", now_rfc3339()))
        .with_context(|| format!("failed to write {}", layout.stop_file.display()))?;
    report.detail(format!("stop_file={}", layout.stop_file.display()));
    report.detail(format!("already_requested={already}"));
    audit::record(&layout, "stop", "requested", "stop file written");
    Ok(report)
}
