use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::summarize::effective_threshold;
use crate::commands::{CommandReport, connect, open_case, run_job};
use crate::forensic::audit;
use crate::forensic::chats::dedup::deduplicate;
use crate::forensic::chats::detect::{
    ChatDetector, PatternDetector, WindowedLlmDetector, fallback_hint,
};
use crate::forensic::chats::report::{ChatReport, summarize_chats, write_chat_index};
use crate::forensic::chats::{Chat, ChatCandidate};
use crate::forensic::config::{DetectionStrategy, load_config};
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::segment::load_segments;
use crate::forensic::store::AnalysisStore;
use crate::forensic::summarize::HierarchicalSummarizer;
use crate::provider::ModelGateway;

#[derive(Debug, Clone)]
pub struct ChatsCommandOptions {
    pub out: PathBuf,
    pub strategy: Option<DetectionStrategy>,
    pub detect_only: bool,
    pub threshold: Option<usize>,
    pub progress: ProgressMode,
}

struct ChatsOutcome {
    candidates: usize,
    chats: Vec<Chat>,
    reports: Vec<ChatReport>,
    cancelled: bool,
}

pub fn run(opts: &ChatsCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let config = loaded.config;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("chats");

    let segments = load_segments(&layout)?;
    let strategy = opts.strategy.unwrap_or(config.detection.strategy);
    let needs_model = strategy == DetectionStrategy::Llm || !opts.detect_only;
    let connection: Option<(Box<dyn ModelGateway>, Duration)> = if needs_model {
        Some(connect(&config)?)
    } else {
        None
    };
    report.detail(format!("strategy={}", strategy.label()));
    report.detail(format!("segments={}", segments.len()));

    let threshold = effective_threshold(&config, opts.threshold);
    let overlap = config.detection.overlap_chars;
    let dedup = config.dedup;
    let detect_only = opts.detect_only;
    let store = AnalysisStore::new(&layout);
    let job_layout = layout.clone();
    let segment_count = segments.len();

    let outcome = run_job(&layout, opts.progress, move |sink, cancel| {
        let detect_window = if detect_only {
            ProgressWindow::default()
        } else {
            ProgressWindow::new(0.0, 40.0)
        };
        let candidates: Vec<ChatCandidate> = match (strategy, &connection) {
            (DetectionStrategy::Llm, Some((gateway, delay))) => {
                WindowedLlmDetector::new(gateway.as_ref(), overlap, *delay)
                    .detect(&segments, cancel, sink, detect_window)?
            }
            _ => PatternDetector.detect(&segments, cancel, sink, detect_window)?,
        };
        let candidate_count = candidates.len();
        let chats = deduplicate(candidates, &dedup);
        sink.log(&format!(
            "{candidate_count} sighting(s) merged into {} chat(s)",
            chats.len()
        ));
        write_chat_index(&job_layout, &chats, strategy.label())?;

        let mut reports = Vec::new();
        if !detect_only
            && !cancel.is_cancelled()
            && let Some((gateway, delay)) = &connection
        {
            let summarizer = HierarchicalSummarizer::new(gateway.as_ref(), *delay);
            reports = summarize_chats(
                &job_layout,
                &store,
                &segments,
                &summarizer,
                &chats,
                threshold,
                cancel,
                sink,
                ProgressWindow::new(40.0, 100.0),
            )?;
        }
        Ok(ChatsOutcome {
            candidates: candidate_count,
            chats,
            reports,
            cancelled: cancel.is_cancelled(),
        })
    })?;

    report.detail(format!("candidates={}", outcome.candidates));
    report.detail(format!("chats={}", outcome.chats.len()));
    for chat in &outcome.chats {
        report.detail(format!(
            "{} kind={} segments={} confidence={:?} name={}",
            chat.chat_id,
            chat.kind.label(),
            chat.segment_ids.len(),
            chat.confidence,
            chat.display_name()
        ));
    }
    report.detail(format!("chats_index={}", layout.chats_file().display()));
    if strategy == DetectionStrategy::Pattern
        && let Some(hint) = fallback_hint(outcome.chats.len(), segment_count)
    {
        report.detail(format!("hint={hint}"));
    }
    for chat_report in &outcome.reports {
        report.detail(format!(
            "report {} analyses={} path={}",
            chat_report.chat_id,
            chat_report.analyses_used,
            chat_report.path.display()
        ));
        if chat_report.failed {
            report.issue(format!("summary of {} failed", chat_report.chat_id));
        }
    }
    if outcome.cancelled {
        report.detail("cancelled=true".to_string());
    }
    audit::record(
        &layout,
        "chats",
        if outcome.cancelled { "cancelled" } else { "ok" },
        &format!(
            "{} chats from {} sightings ({})",
            outcome.chats.len(),
            outcome.candidates,
            strategy.label()
        ),
    );
    Ok(report)
}
