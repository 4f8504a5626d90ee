use crate::forensic::paths::CaseLayout;
use crate::forensic::progress::{CancelToken, ProgressSink, ProgressWindow};
use crate::forensic::store::SegmentAnalysis;
use crate::provider::ModelGateway;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::time::Duration;

/// Analyses per group on the hierarchical path. Independent of the threshold.
pub const GROUP_SIZE: usize = 20;
pub const GROUP_MAX_TOKENS: u32 = 4096;
pub const FINAL_MAX_TOKENS: u32 = 8000;
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Included verbatim in every final aggregation prompt.
pub const SEVERITY_ORDER_INSTRUCTION: &str =
    "Order every flagged or problematic item by severity, most severe first.";

/// Prompt set for one kind of aggregated report.
pub trait ReportBrief {
    fn name(&self) -> &str;

    fn flat_prompt(&self, analysis_count: usize, combined: &str) -> String;

    fn group_prompt(&self, group_no: usize, group_count: usize, combined: &str) -> String;

    fn final_prompt(&self, group_count: usize, combined: &str) -> String;

    fn final_max_tokens(&self) -> u32 {
        FINAL_MAX_TOKENS
    }

    fn empty_body(&self) -> String {
        "No analyses available.".to_string()
    }

    fn failure_body(
        &self,
        error: &str,
        analysis_count: usize,
        group_summaries: &[String],
    ) -> String {
        let mut body = format!(
            "ERROR creating the {} summary: {error}\n\n\
The automatic summary was not generated.\n\n\
Analyses available: {analysis_count}\n",
            self.name()
        );
        if !group_summaries.is_empty() {
            let _ = writeln!(body, "Groups processed: {}", group_summaries.len());
        }
        body.push_str(
            "\nSuggestions:\n\
- check connectivity to the model provider\n\
- check that the API key is valid and has remaining credit\n\
- use `chatsift search` to extract specific information\n",
        );
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPath {
    Flat,
    Hierarchical { groups: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalSummary {
    pub body: String,
    /// Empty on the flat path.
    pub group_summaries: Vec<String>,
    pub path: SummaryPath,
    pub analysis_count: usize,
    pub failed: bool,
    pub cancelled: bool,
}

pub fn choose_path(analysis_count: usize, threshold: usize) -> SummaryPath {
    if analysis_count <= threshold {
        SummaryPath::Flat
    } else {
        SummaryPath::Hierarchical {
            groups: analysis_count.div_ceil(GROUP_SIZE),
        }
    }
}

fn combine_for_flat(analyses: &[SegmentAnalysis]) -> String {
    analyses
        .iter()
        .map(|a| format!("=== ANALYSIS OF SEGMENT {} ===\n{}", a.segment_id, a.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn combine_for_group(group: &[SegmentAnalysis]) -> String {
    group
        .iter()
        .map(|a| format!("Segment {}: {}", a.segment_id, a.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn combine_groups(group_summaries: &[String]) -> String {
    group_summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("GROUP {}:\n{s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct HierarchicalSummarizer<'a> {
    gateway: &'a dyn ModelGateway,
    delay: Duration,
}

impl<'a> HierarchicalSummarizer<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, delay: Duration) -> Self {
        Self { gateway, delay }
    }

    fn pace(&self, calls_made: usize, cancel: &CancelToken) -> bool {
        if calls_made == 0 || self.delay.is_zero() {
            return !cancel.is_cancelled();
        }
        cancel.sleep(self.delay)
    }

    pub fn summarize(
        &self,
        analyses: &[SegmentAnalysis],
        threshold: usize,
        brief: &dyn ReportBrief,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> FinalSummary {
        let analysis_count = analyses.len();
        let path = choose_path(analysis_count, threshold);
        let mut summary = FinalSummary {
            body: String::new(),
            group_summaries: Vec::new(),
            path,
            analysis_count,
            failed: false,
            cancelled: false,
        };

        if analyses.is_empty() {
            summary.body = brief.empty_body();
            sink.progress(window.end);
            return summary;
        }

        let final_prompt = match path {
            SummaryPath::Flat => {
                sink.log(&format!(
                    "{} summary: flat path over {analysis_count} analyses",
                    brief.name()
                ));
                brief.flat_prompt(analysis_count, &combine_for_flat(analyses))
            }
            SummaryPath::Hierarchical { groups } => {
                sink.log(&format!(
                    "{} summary: hierarchical path, {groups} group(s) of up to {GROUP_SIZE} (threshold {threshold})",
                    brief.name()
                ));
                for (idx, group) in analyses.chunks(GROUP_SIZE).enumerate() {
                    if !self.pace(idx, cancel) {
                        summary.cancelled = true;
                        break;
                    }
                    let group_no = idx + 1;
                    sink.log(&format!("summarizing group {group_no}/{groups}"));
                    let prompt = brief.group_prompt(group_no, groups, &combine_for_group(group));
                    let text = match self.gateway.complete_text(
                        &prompt,
                        GROUP_MAX_TOKENS,
                        SUMMARY_TEMPERATURE,
                    ) {
                        Ok(text) => text,
                        Err(err) => {
                            log::warn!("group {group_no} failed: {err:#}");
                            format!("ERROR in group {group_no}: {err:#}")
                        }
                    };
                    summary.group_summaries.push(text);
                    sink.progress(window.slice(0.0, 0.9).at(group_no, groups));
                }
                brief.final_prompt(
                    summary.group_summaries.len(),
                    &combine_groups(&summary.group_summaries),
                )
            }
        };

        let calls_made = summary.group_summaries.len();
        if summary.cancelled || !self.pace(calls_made, cancel) {
            summary.cancelled = true;
            summary.failed = true;
            summary.body = brief.failure_body(
                "cancelled before the final aggregation",
                analysis_count,
                &summary.group_summaries,
            );
            return summary;
        }

        sink.log(&format!("{} summary: final aggregation", brief.name()));
        match self
            .gateway
            .complete_text(&final_prompt, brief.final_max_tokens(), SUMMARY_TEMPERATURE)
        {
            Ok(body) => summary.body = body,
            Err(err) => {
                log::error!("{} final aggregation failed: {err:#}", brief.name());
                summary.failed = true;
                summary.body =
                    brief.failure_body(&format!("{err:#}"), analysis_count, &summary.group_summaries);
            }
        }
        sink.progress(window.end);
        summary
    }
}

/// Case-wide forensic report over every segment analysis.
pub struct DocumentBrief {
    pub total_segments: usize,
}

const DOCUMENT_STRUCTURE: &str = "\
## 1. Overview
- Summary of the document, period covered, number of participants
## 2. Participants and structure
- Every participant with role and group dynamics
## 3. Timeline
- Significant events in chronological order with timestamps
## 4. Locations and movements
- Every place, address, shared position or travel mentioned, with who, when, context and segment reference
## 5. Flagged content
- Threats, insults, harassment, manipulation, violence or illegal content, with type, severity, author, recipient, timestamp, quotation and segment reference
## 6. Relevant content
- Key messages, shared media, external links
## 7. Sensitive data
- Phone numbers, e-mails, addresses, identity documents, financial data
## 8. Patterns
- Communication patterns, relationships, recurring themes
## 9. Forensic notes
- Anomalies and observations of investigative interest";

impl ReportBrief for DocumentBrief {
    fn name(&self) -> &str {
        "final"
    }

    fn flat_prompt(&self, analysis_count: usize, combined: &str) -> String {
        format!(
            "A chat export of {total} segments was analyzed segment by segment; {analysis_count} analyses follow.\n\n\
Write a complete FINAL FORENSIC REPORT with exactly this structure:\n\n{DOCUMENT_STRUCTURE}\n\n\
{SEVERITY_ORDER_INSTRUCTION}\n\
If a section has nothing to report, say so explicitly.\n\n\
SEGMENT ANALYSES:\n{combined}\n\n\
Keep timestamps and segment references precise. Use H2 (##) and H3 (###) headings.",
            total = self.total_segments,
        )
    }

    fn group_prompt(&self, group_no: usize, group_count: usize, combined: &str) -> String {
        format!(
            "Summarize this group ({group_no}/{group_count}) of segment analyses from a forensic chat export.\n\n\
{combined}\n\n\
Extract the key points (participants, events with timestamps, locations, flagged content) concisely."
        )
    }

    fn final_prompt(&self, group_count: usize, combined: &str) -> String {
        format!(
            "A very large chat export ({total} segments) was summarized in {group_count} groups.\n\n\
Combine the group summaries into a complete FINAL FORENSIC REPORT with exactly this structure:\n\n{DOCUMENT_STRUCTURE}\n\n\
{SEVERITY_ORDER_INSTRUCTION}\n\
Aggregate locations and flagged content from ALL groups.\n\n\
GROUP SUMMARIES:\n{combined}\n\n\
Keep timestamps and references precise. Use H2 (##) and H3 (###) headings.",
            total = self.total_segments,
        )
    }
}

/// Free-text question answered over stored analyses.
pub struct SearchBrief<'q> {
    pub query: &'q str,
}

impl ReportBrief for SearchBrief<'_> {
    fn name(&self) -> &str {
        "search"
    }

    fn flat_prompt(&self, analysis_count: usize, combined: &str) -> String {
        format!(
            "You have {analysis_count} analyses of a chat export.\n\n\
QUESTION: {query}\n\n\
Answer using all analyses:\n\
1. Detailed answer\n\
2. Precise citations: segment, timestamp and quoted text for every item\n\
3. Summary with the total number of items found\n\n\
If nothing relevant is found, say so clearly.\n\n\
ANALYSES:\n{combined}",
            query = self.query,
        )
    }

    fn group_prompt(&self, group_no: usize, group_count: usize, combined: &str) -> String {
        format!(
            "Group {group_no}/{group_count} of analyses of a chat export.\n\n\
QUESTION: {query}\n\n\
Report anything relevant to the question with its segment, a quotation and context. \
If nothing is relevant, answer \"No relevant items in this group\".\n\n\
ANALYSES:\n{combined}",
            query = self.query,
        )
    }

    fn final_prompt(&self, group_count: usize, combined: &str) -> String {
        format!(
            "The following question was searched in {group_count} groups of analyses.\n\n\
QUESTION: {query}\n\n\
RESULTS FROM ALL GROUPS:\n{combined}\n\n\
Aggregate every relevant result:\n\
1. Detailed answer drawing on all groups\n\
2. Precise citations: segment, timestamp, quotation\n\
3. Summary with the total number of items found\n\n\
If no group found anything, say so clearly.",
            query = self.query,
        )
    }

    fn final_max_tokens(&self) -> u32 {
        GROUP_MAX_TOKENS
    }

    fn failure_body(
        &self,
        error: &str,
        _analysis_count: usize,
        group_summaries: &[String],
    ) -> String {
        format!(
            "ERROR in the final aggregation: {error}\n\nPARTIAL RESULTS:\n{}",
            combine_groups(group_summaries)
        )
    }
}

fn path_label(path: SummaryPath) -> String {
    match path {
        SummaryPath::Flat => "flat".to_string(),
        SummaryPath::Hierarchical { groups } => format!("hierarchical ({groups} groups)"),
    }
}

/// Writes the group summaries to `path`; with no groups, removes any file left by an earlier run.
pub fn write_group_summaries(path: &std::path::Path, groups: &[String]) -> Result<()> {
    if groups.is_empty() {
        if path.is_file() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        return Ok(());
    }
    let mut out = String::from("# Group summaries\n");
    for (idx, text) in groups.iter().enumerate() {
        let _ = write!(out, "\n## Group {}\n\n{}\n", idx + 1, text.trim_end());
    }
    fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

/// Writes `final_summary.md`, plus `group_summaries.md` on the hierarchical path only.
pub fn write_final_summary(
    layout: &CaseLayout,
    summary: &FinalSummary,
    total_segments: usize,
) -> Result<()> {
    fs::create_dir_all(&layout.reports_dir)
        .with_context(|| format!("failed to create {}", layout.reports_dir.display()))?;
    let title = if summary.failed {
        "Final summary (generation failed)"
    } else {
        "Final forensic summary"
    };
    let report = format!(
        "# {title}\n\n- analyses: {}/{total_segments}\n- approach: {}\n\n{}\n",
        summary.analysis_count,
        path_label(summary.path),
        summary.body.trim_end()
    );
    let path = layout.final_summary_file();
    fs::write(&path, report).with_context(|| format!("failed to write {}", path.display()))?;

    write_group_summaries(&layout.group_summaries_file(), &summary.group_summaries)
}
