pub mod analyze;
pub mod chats;
pub mod locate;
pub mod reanalyze;
pub mod run;
pub mod search;
pub mod segment;
pub mod status;
pub mod stop;
pub mod summarize;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::forensic::config::ForensicConfig;
use crate::forensic::paths::CaseLayout;
use crate::forensic::pipeline;
use crate::forensic::progress::{CancelToken, ProgressMode, ProgressSink, StderrRenderer};
use crate::provider::{ModelGateway, build_gateway, policy_for};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn open_case(out: &Path) -> Result<CaseLayout> {
    let layout = CaseLayout::new(out);
    layout.ensure_dirs()?;
    Ok(layout)
}

/// Builds the configured gateway, checks it is reachable, and returns the pause between calls.
pub fn connect(config: &ForensicConfig) -> Result<(Box<dyn ModelGateway>, Duration)> {
    let gateway = build_gateway(&config.provider)?;
    gateway.preflight()?;
    let policy = policy_for(gateway.kind(), &config.rate_limit);
    log::info!(
        "using {} model {} ({:.1}s between requests)",
        gateway.kind().display_name(),
        gateway.model(),
        policy.delay.as_secs_f64()
    );
    Ok((gateway, policy.delay))
}

pub fn read_prompt_file(path: Option<&Path>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("prompt file {} is empty", path.display());
    }
    Ok(Some(trimmed.to_string()))
}

/// Runs `job` on the pipeline worker and renders its events until it finishes.
/// A `STOP` file in the case directory cancels the job cooperatively.
pub fn run_job<T, F>(layout: &CaseLayout, mode: ProgressMode, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProgressSink, &CancelToken) -> Result<T> + Send + 'static,
{
    layout.clear_stop_request()?;
    let renderer = StderrRenderer::new(mode);
    let handle = pipeline::spawn(job);
    let result = handle.wait(&renderer, || layout.stop_requested());
    if layout.stop_requested() {
        layout.clear_stop_request()?;
    }
    result
}
