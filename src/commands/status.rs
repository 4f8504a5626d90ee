use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::forensic::chats::report::load_chat_index;
use crate::forensic::config::{ForensicConfig, load_config};
use crate::forensic::paths::CaseLayout;
use crate::forensic::segment::load_segments;
use crate::forensic::store::AnalysisStore;
use crate::provider::{policy_for, resolve_provider};

include!(concat!(env!("OUT_DIR"), "/chatsift_env_allowlist.rs"));

#[derive(Debug, Clone, Default)]
pub struct StatusCommandOptions {
    pub out: Option<PathBuf>,
}

/// `CHATSIFT_*` variables set in the environment that nothing reads; usually typos.
pub fn unknown_env_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("CHATSIFT_"))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn describe_config(config: &ForensicConfig, report: &mut CommandReport) {
    match resolve_provider(&config.provider, &|var| env::var(var).ok()) {
        Ok(resolved) => {
            let policy = policy_for(resolved.kind, &config.rate_limit);
            report.detail(format!("provider={}", resolved.kind.label()));
            report.detail(format!("model={}", resolved.model));
            report.detail(format!("request_delay_secs={:.1}", policy.delay.as_secs_f64()));
        }
        Err(err) => report.issue(format!("provider: {err:#}")),
    }
    report.detail(format!(
        "hierarchical_threshold={}",
        config.summary.hierarchical_threshold
    ));
    report.detail(format!("detection_strategy={}", config.detection.strategy.label()));
    report.detail(format!("max_segment_chars={}", config.segmenter.max_chars));
}

fn describe_case(layout: &CaseLayout, report: &mut CommandReport) -> Result<()> {
    report.detail(format!("case_dir={}", layout.root.display()));
    if !layout.root.exists() {
        report.issue(format!("case directory {} does not exist", layout.root.display()));
        return Ok(());
    }

    match load_segments(layout) {
        Ok(segments) => report.detail(format!("segments={}", segments.len())),
        Err(_) => report.detail("segments=0".to_string()),
    }

    let store = AnalysisStore::new(layout);
    let ids = store.ids()?;
    let failed = ids
        .iter()
        .filter(|id| store.read_meta(**id).is_some_and(|meta| meta.failed))
        .count();
    report.detail(format!("analyses={}", ids.len()));
    report.detail(format!("failed_analyses={failed}"));

    if let Some(index) = load_chat_index(layout)? {
        report.detail(format!("chats={} strategy={}", index.total_chats, index.strategy));
    }
    report.detail(format!(
        "final_summary={}",
        layout.final_summary_file().exists()
    ));
    report.detail(format!("locations={}", layout.locations_file().exists()));
    report.detail(format!("stop_requested={}", layout.stop_requested()));

    if layout.analyses_dir.exists() {
        let busy = store.lock().is_err();
        report.detail(format!("analysis_running={busy}"));
    }
    Ok(())
}

pub fn run(opts: &StatusCommandOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let loaded = load_config()?;
    report.detail(format!(
        "config_source={}",
        loaded
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string())
    ));
    describe_config(&loaded.config, &mut report);

    for key in unknown_env_keys(env::vars().map(|(k, _)| k)) {
        report.issue(format!("unknown environment variable {key}"));
    }

    if let Some(out) = &opts.out {
        describe_case(&CaseLayout::new(out), &mut report)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_covers_keys_read_by_config() {
        assert!(GENERATED_ENV_ALLOWLIST.contains(&"CHATSIFT_PROVIDER"));
        assert!(GENERATED_ENV_ALLOWLIST.contains(&"CHATSIFT_HIERARCHICAL_THRESHOLD"));
    }

    #[test]
    fn unknown_keys_are_reported_sorted() {
        // Built at runtime so the build script does not allowlist them.
        let typo = format!("{}PROVIDR", "CHATSIFT_");
        let other = format!("{}AAA", "CHATSIFT_");
        let keys = vec![
            typo.clone(),
            "CHATSIFT_MODEL".to_string(),
            "PATH".to_string(),
            other.clone(),
        ];
        assert_eq!(unknown_env_keys(keys), vec![other, typo]);
    }
}
