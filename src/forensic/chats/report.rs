use super::Chat;
use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{CancelToken, ProgressSink, ProgressWindow};
use crate::forensic::segment::Segment;
use crate::forensic::store::AnalysisStore;
use crate::forensic::summarize::{
    FinalSummary, HierarchicalSummarizer, ReportBrief, SEVERITY_ORDER_INSTRUCTION,
    write_group_summaries,
};
use crate::forensic::util::now_rfc3339;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const CHAT_FINAL_MAX_TOKENS: u32 = 6000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    #[serde(flatten)]
    pub chat: Chat,
    pub display_name: String,
}

/// Contents of `reports/chats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatIndex {
    pub generated_at: String,
    pub strategy: String,
    pub total_chats: usize,
    pub chats: Vec<ChatEntry>,
}

pub fn write_chat_index(layout: &CaseLayout, chats: &[Chat], strategy: &str) -> Result<PathBuf> {
    fs::create_dir_all(&layout.reports_dir)
        .with_context(|| format!("failed to create {}", layout.reports_dir.display()))?;
    let index = ChatIndex {
        generated_at: now_rfc3339(),
        strategy: strategy.to_string(),
        total_chats: chats.len(),
        chats: chats
            .iter()
            .map(|chat| ChatEntry {
                display_name: chat.display_name(),
                chat: chat.clone(),
            })
            .collect(),
    };
    let path = layout.chats_file();
    let data = serde_json::to_string_pretty(&index)?;
    fs::write(&path, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn load_chat_index(layout: &CaseLayout) -> Result<Option<ChatIndex>> {
    let path = layout.chats_file();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let index = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(index))
}

fn chat_info(chat: &Chat) -> String {
    let participants = if chat.participants.is_empty() {
        "unknown".to_string()
    } else {
        chat.participants
            .iter()
            .map(|p| {
                let mut label = p.label().to_string();
                if let Some(id) = p.id.as_deref().filter(|id| *id != label) {
                    label = format!("{label} ({id})");
                }
                if p.is_owner {
                    label.push_str(" [owner]");
                }
                label
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "CHAT INFORMATION:\n\
- Name: {name}\n\
- Type: {kind}\n\
- Participants: {participants}\n\
- Period: {start} to {last}\n\
- Attachments: {attachments}\n\
- Segments: {segments}",
        name = chat.display_name(),
        kind = chat.kind.label(),
        start = chat.metadata.start_time.as_deref().unwrap_or("N/A"),
        last = chat.metadata.last_activity.as_deref().unwrap_or("N/A"),
        attachments = chat.metadata.num_attachments,
        segments = chat.segment_ids.len(),
    )
}

const CHAT_STRUCTURE: &str = "\
## 1. General information
- Nature of the conversation and relationship between participants
## 2. Main topics
- Subjects discussed, in chronological order
## 3. Key messages
- The most relevant messages with timestamp and author
## 4. Relationship dynamics
- Tone, roles and changes over time
## 5. Events
- Meetings, appointments and incidents with dates
## 6. Attachments and media
- Photos, videos, documents and what they show
## 7. Places
- Every location mentioned, with context
## 8. Problematic content
- Threats, harassment or illegal content with quotation and timestamp
## 9. Forensic notes
- Observations of investigative interest";

/// Report for one reconstructed conversation.
pub struct ChatBrief<'c> {
    pub chat: &'c Chat,
}

impl ReportBrief for ChatBrief<'_> {
    fn name(&self) -> &str {
        "chat"
    }

    fn flat_prompt(&self, analysis_count: usize, combined: &str) -> String {
        format!(
            "{info}\n\n{analysis_count} segment analyses of this conversation follow.\n\n\
Write a complete summary of the conversation with this structure:\n\n{CHAT_STRUCTURE}\n\n\
{SEVERITY_ORDER_INSTRUCTION}\n\n\
ANALYSES:\n{combined}",
            info = chat_info(self.chat),
        )
    }

    fn group_prompt(&self, group_no: usize, group_count: usize, combined: &str) -> String {
        format!(
            "{info}\n\nSummarize part {group_no}/{group_count} of the analyses of this conversation. \
Keep participants, events with timestamps, places and problematic content.\n\n{combined}",
            info = chat_info(self.chat),
        )
    }

    fn final_prompt(&self, group_count: usize, combined: &str) -> String {
        format!(
            "{info}\n\nThe conversation was summarized in {group_count} parts.\n\n\
Combine them into a complete summary with this structure:\n\n{CHAT_STRUCTURE}\n\n\
{SEVERITY_ORDER_INSTRUCTION}\n\n\
PART SUMMARIES:\n{combined}",
            info = chat_info(self.chat),
        )
    }

    fn final_max_tokens(&self) -> u32 {
        CHAT_FINAL_MAX_TOKENS
    }

    fn empty_body(&self) -> String {
        "No analyses available for this chat.".to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReport {
    pub chat_id: String,
    pub display_name: String,
    pub analyses_used: usize,
    pub missing_segments: Vec<u32>,
    pub failed: bool,
    pub path: PathBuf,
}

fn render_chat_report(chat: &Chat, summary: &FinalSummary, missing: &[u32]) -> String {
    let mut out = format!(
        "# {} ({})\n\n{}\n- analyses used: {}\n",
        chat.display_name(),
        chat.chat_id,
        chat_info(chat),
        summary.analysis_count
    );
    if !missing.is_empty() {
        let list: Vec<String> = missing.iter().map(u32::to_string).collect();
        out.push_str(&format!("- segments without analysis: {}\n", list.join(", ")));
    }
    out.push('\n');
    out.push_str(summary.body.trim_end());
    out.push('\n');
    out
}

/// Summarizes each chat from the stored analyses of its segments and writes `reports/chats/<id>.md`.
/// Only analyses written for the current text of `segments` are used.
#[allow(clippy::too_many_arguments)]
pub fn summarize_chats(
    layout: &CaseLayout,
    store: &AnalysisStore,
    segments: &[Segment],
    summarizer: &HierarchicalSummarizer<'_>,
    chats: &[Chat],
    threshold: usize,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
    window: ProgressWindow,
) -> Result<Vec<ChatReport>> {
    fs::create_dir_all(&layout.chat_reports_dir)
        .with_context(|| format!("failed to create {}", layout.chat_reports_dir.display()))?;
    let mut reports = Vec::new();
    for (idx, chat) in chats.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let chat_segments: Vec<Segment> = segments
            .iter()
            .filter(|segment| chat.segment_ids.contains(&segment.id))
            .cloned()
            .collect();
        let (analyses, mut missing) = store.load_current(&chat_segments)?;
        missing.extend(
            chat.segment_ids
                .iter()
                .filter(|id| !chat_segments.iter().any(|segment| segment.id == **id)),
        );
        missing.sort_unstable();
        if !missing.is_empty() {
            log::warn!(
                "{}: {} segment(s) have no analysis yet",
                chat.chat_id,
                missing.len()
            );
        }
        sink.log(&format!(
            "summarizing {} ({}) from {} analyses",
            chat.chat_id,
            chat.display_name(),
            analyses.len()
        ));
        let chat_window = ProgressWindow::new(
            window.at(idx, chats.len()),
            window.at(idx + 1, chats.len()),
        );
        let summary = summarizer.summarize(
            &analyses,
            threshold,
            &ChatBrief { chat },
            cancel,
            sink,
            chat_window,
        );

        let path = layout.chat_report_file(&chat.chat_id);
        fs::write(&path, render_chat_report(chat, &summary, &missing))
            .with_context(|| format!("failed to write {}", path.display()))?;
        let groups_path = layout
            .chat_reports_dir
            .join(format!("{}_groups.md", chat.chat_id));
        write_group_summaries(&groups_path, &summary.group_summaries)?;
        reports.push(ChatReport {
            chat_id: chat.chat_id.clone(),
            display_name: chat.display_name(),
            analyses_used: summary.analysis_count,
            missing_segments: missing,
            failed: summary.failed,
            path,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensic::chats::{ChatKind, ChatMetadata, Confidence, Participant};
    use crate::forensic::progress::NoProgress;
    use crate::forensic::store::AnalysisMeta;
    use crate::forensic::util::sha256_hex;
    use crate::provider::testing::ScriptedGateway;
    use std::time::Duration;

    fn chat(id: &str, segment_ids: Vec<u32>) -> Chat {
        Chat {
            chat_id: id.to_string(),
            kind: ChatKind::OneToOne,
            identifier: Some("3f2a9c8b7d".to_string()),
            account: None,
            participants: vec![
                Participant {
                    id: Some("+39111".to_string()),
                    name: Some("Mario".to_string()),
                    is_owner: true,
                },
                Participant {
                    id: Some("+39222".to_string()),
                    name: Some("Anna".to_string()),
                    is_owner: false,
                },
            ],
            metadata: ChatMetadata {
                start_time: Some("03/02/2024".to_string()),
                ..ChatMetadata::default()
            },
            segment_ids,
            confidence: Confidence::High,
        }
    }

    fn segment(id: u32) -> Segment {
        let text = format!("page {id} body");
        Segment {
            id,
            page_range: (id, id),
            pages: vec![id],
            char_count: text.len(),
            fingerprint: sha256_hex(&text),
            text,
            media_refs: Vec::new(),
        }
    }

    fn seed(store: &AnalysisStore, segments: &[Segment]) {
        for segment in segments {
            let meta = AnalysisMeta {
                segment_id: segment.id,
                fingerprint: segment.fingerprint.clone(),
                provider: "local".to_string(),
                model: "scripted".to_string(),
                failed: false,
                written_at: String::new(),
            };
            store
                .write(segment.id, &format!("analysis {}", segment.id), &meta)
                .expect("seed");
        }
    }

    #[test]
    fn chat_index_round_trips_with_display_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CaseLayout::new(dir.path());
        write_chat_index(&layout, &[chat("chat_001", vec![1, 2])], "pattern").expect("write");
        let index = load_chat_index(&layout).expect("load").expect("present");
        assert_eq!(index.total_chats, 1);
        assert_eq!(index.chats[0].display_name, "Anna");
        assert_eq!(index.chats[0].chat.segment_ids, vec![1, 2]);
    }

    #[test]
    fn missing_index_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_chat_index(&CaseLayout::new(dir.path())).expect("load").is_none());
    }

    #[test]
    fn chat_summaries_use_only_their_segments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CaseLayout::new(dir.path());
        let store = AnalysisStore::new(&layout);
        let segments: Vec<Segment> = (1..=3).map(segment).collect();
        seed(&store, &segments);
        let gateway = ScriptedGateway::constant("chat summary body");
        let summarizer = HierarchicalSummarizer::new(&gateway, Duration::ZERO);
        let chats = vec![chat("chat_001", vec![1, 3, 9]), chat("chat_002", vec![7])];

        let reports = summarize_chats(
            &layout,
            &store,
            &segments,
            &summarizer,
            &chats,
            30,
            &CancelToken::new(),
            &NoProgress,
            ProgressWindow::default(),
        )
        .expect("summaries");

        assert_eq!(gateway.call_count(), 1);
        let prompt = &gateway.prompts()[0];
        assert!(prompt.contains("analysis 1") && prompt.contains("analysis 3"));
        assert!(!prompt.contains("analysis 2"));
        assert!(prompt.contains("- Participants: Mario (+39111) [owner], Anna (+39222)"));
        assert!(prompt.contains(SEVERITY_ORDER_INSTRUCTION));

        assert_eq!(reports[0].missing_segments, vec![9]);
        let first = fs::read_to_string(&reports[0].path).expect("report");
        assert!(first.contains("chat summary body"));
        assert!(first.contains("segments without analysis: 9"));
        let second = fs::read_to_string(&reports[1].path).expect("report");
        assert!(second.contains("No analyses available for this chat."));
    }

    #[test]
    fn analysis_of_replaced_segment_text_is_reported_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CaseLayout::new(dir.path());
        let store = AnalysisStore::new(&layout);
        let mut segments: Vec<Segment> = (1..=2).map(segment).collect();
        seed(&store, &segments);
        segments[1].text = "pages 2 and 3 after re-segmenting".to_string();
        segments[1].fingerprint = sha256_hex(&segments[1].text);
        let gateway = ScriptedGateway::constant("summary");
        let summarizer = HierarchicalSummarizer::new(&gateway, Duration::ZERO);

        let reports = summarize_chats(
            &layout,
            &store,
            &segments,
            &summarizer,
            &[chat("chat_001", vec![1, 2])],
            30,
            &CancelToken::new(),
            &NoProgress,
            ProgressWindow::default(),
        )
        .expect("summaries");

        assert_eq!(reports[0].analyses_used, 1);
        assert_eq!(reports[0].missing_segments, vec![2]);
        assert!(!gateway.prompts()[0].contains("analysis 2"));
    }

    #[test]
    fn flat_rerun_removes_the_chat_group_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CaseLayout::new(dir.path());
        let store = AnalysisStore::new(&layout);
        let segments: Vec<Segment> = (1..=3).map(segment).collect();
        seed(&store, &segments);
        let gateway = ScriptedGateway::constant("summary");
        let summarizer = HierarchicalSummarizer::new(&gateway, Duration::ZERO);
        let chats = vec![chat("chat_001", vec![1, 2, 3])];
        let groups_path = layout.chat_reports_dir.join("chat_001_groups.md");

        for (threshold, grouped) in [(2, true), (30, false)] {
            summarize_chats(
                &layout,
                &store,
                &segments,
                &summarizer,
                &chats,
                threshold,
                &CancelToken::new(),
                &NoProgress,
                ProgressWindow::default(),
            )
            .expect("summaries");
            assert_eq!(groups_path.exists(), grouped);
        }
    }
}
