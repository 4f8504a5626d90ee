use super::{ChatCandidate, ChatKind, ChatMetadata, Confidence, Participant};
use crate::forensic::progress::{CancelToken, ProgressSink, ProgressWindow};
use crate::forensic::segment::Segment;
use crate::forensic::structured;
use crate::forensic::util::{head_chars, tail_chars};
use crate::provider::{CompletionRequest, ModelGateway};
use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

pub const DETECTION_MAX_TOKENS: u32 = 1500;
pub const DETECTION_TEMPERATURE: f32 = 0.1;
const MAX_PARTICIPANT_LINES: usize = 256;

static START_TIME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Start Time:\s*\d").expect("hardcoded regex pattern is valid")
});
static PARTICIPANTS_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Participants:[ \t]*\r?\n").expect("hardcoded regex pattern is valid")
});
static IDENTIFIER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Identifier:\s*[a-f0-9]{10,}").expect("hardcoded regex pattern is valid")
});

static START_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Start Time:[ \t]*([^\r\n]+)").expect("hardcoded regex pattern is valid")
});
static LAST_ACTIVITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Last Activity:[ \t]*([^\r\n]+)").expect("hardcoded regex pattern is valid")
});
static ACCOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Account:[ \t]*([^\r\n]+)").expect("hardcoded regex pattern is valid")
});
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Identifier:[ \t]*([A-Za-z0-9@._:-]+)")
        .expect("hardcoded regex pattern is valid")
});
static ATTACHMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Number of attachments:\s*(\d+)").expect("hardcoded regex pattern is valid")
});
static BODY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Body file:\s*(chat-\d+\.txt)").expect("hardcoded regex pattern is valid")
});

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z ]{1,40}:").expect("hardcoded regex pattern is valid")
});
static OWNER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\bowner\b\)?").expect("hardcoded regex pattern is valid")
});
static PARTICIPANT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"wxid_[A-Za-z0-9_-]+|[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+|\+?\d[\d \-]{8,}\d")
        .expect("hardcoded regex pattern is valid")
});

/// Turns segments into per-segment chat sightings.
pub trait ChatDetector {
    fn name(&self) -> &'static str;

    fn detect(
        &self,
        segments: &[Segment],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> Result<Vec<ChatCandidate>>;
}

/// How many of the three header markers appear in `text`.
pub fn header_marker_count(text: &str) -> usize {
    [&*START_TIME_MARKER, &*PARTICIPANTS_MARKER, &*IDENTIFIER_MARKER]
        .iter()
        .filter(|re| re.is_match(text))
        .count()
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_participant_line(line: &str) -> Option<Participant> {
    let is_owner = OWNER_TAG.is_match(line);
    let cleaned = OWNER_TAG.replace_all(line, " ");
    let id = PARTICIPANT_ID
        .find(&cleaned)
        .map(|m| m.as_str().trim().to_string());
    let rest = match &id {
        Some(id) => cleaned.replacen(id.as_str(), " ", 1),
        None => cleaned.into_owned(),
    };
    let name = rest
        .trim_matches(|c: char| c.is_whitespace() || "-,;|()<>[]".contains(c))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let name = (!name.is_empty()).then_some(name);
    if id.is_none() && name.is_none() {
        return None;
    }
    Some(Participant { id, name, is_owner })
}

/// Lines after `Participants:` up to the next field line, page marker or blank gap.
pub fn parse_participants(text: &str) -> Vec<Participant> {
    let Some(marker) = PARTICIPANTS_MARKER.find(text) else {
        return Vec::new();
    };
    let mut out: Vec<Participant> = Vec::new();
    let mut seen = HashSet::new();
    for line in text[marker.end()..].lines().take(MAX_PARTICIPANT_LINES) {
        let line = line.trim();
        if line.is_empty() {
            if out.is_empty() {
                continue;
            }
            break;
        }
        if line.starts_with("---") || FIELD_LINE.is_match(line) {
            break;
        }
        if let Some(participant) = parse_participant_line(line)
            && let Some(key) = participant.normalized_key()
            && seen.insert(key)
        {
            out.push(participant);
        }
    }
    out
}

/// Header metadata of one chat, read from the segment that opens it.
pub fn parse_header(text: &str, segment_id: u32, confidence: Confidence) -> ChatCandidate {
    let participants = parse_participants(text);
    let mut candidate = ChatCandidate::new(
        ChatKind::from_participant_count(participants.len()),
        segment_id,
        confidence,
    );
    candidate.identifier = capture(&IDENTIFIER, text);
    candidate.account = capture(&ACCOUNT, text);
    candidate.metadata = ChatMetadata {
        start_time: capture(&START_TIME, text),
        last_activity: capture(&LAST_ACTIVITY, text),
        num_attachments: capture(&ATTACHMENTS, text)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        body_file: capture(&BODY_FILE, text),
    };
    candidate.participants = participants;
    candidate
}

/// Regex header detection. A segment with at least two of the three markers opens a chat;
/// the segments after it belong to that chat until the next header.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternDetector;

impl ChatDetector for PatternDetector {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn detect(
        &self,
        segments: &[Segment],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> Result<Vec<ChatCandidate>> {
        let mut out = Vec::new();
        let mut current: Option<ChatCandidate> = None;
        let mut orphans = 0usize;

        for (idx, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let markers = header_marker_count(&segment.text);
            if markers >= 2 {
                if let Some(done) = current.take() {
                    out.push(done);
                }
                let confidence = if markers == 3 {
                    Confidence::High
                } else {
                    Confidence::Medium
                };
                let candidate = parse_header(&segment.text, segment.id, confidence);
                sink.log(&format!(
                    "segment {}: chat header found ({} participant(s))",
                    segment.id,
                    candidate.participants.len()
                ));
                current = Some(candidate);
            } else if let Some(chat) = current.as_mut() {
                chat.segment_ids.push(segment.id);
            } else {
                orphans += 1;
            }
            sink.progress(window.at(idx + 1, segments.len()));
        }
        out.extend(current);

        if orphans > 0 {
            log::debug!("{orphans} segment(s) precede the first chat header");
        }
        Ok(out)
    }
}

/// Returned when header detection probably missed conversations.
pub fn fallback_hint(chat_count: usize, segment_count: usize) -> Option<String> {
    (chat_count < 2 && segment_count > 10).then(|| {
        format!(
            "only {chat_count} chat(s) found across {segment_count} segments; \
the export may not use standard headers, try `--strategy llm`"
        )
    })
}

pub fn window_prompt(
    previous_tail: Option<&str>,
    current: &Segment,
    next_head: Option<&str>,
) -> String {
    let previous = previous_tail.unwrap_or("(start of export)");
    let next = next_head.unwrap_or("(end of export)");
    format!(
        "You are reconstructing conversations from a forensic chat export.\n\
List every conversation whose messages or header appear in the CURRENT segment, \
including conversations that continue from the previous segment. \
The PREVIOUS and NEXT excerpts are context only.\n\n\
Reply with JSON only, in this shape:\n\
{{\"chats\": [{{\"type\": \"one_to_one\" | \"group\", \"identifier\": string or null, \
\"account\": string or null, \"participants\": [{{\"id\": string or null, \"name\": string or null, \
\"is_owner\": bool}}], \"start_time\": string or null, \"last_activity\": string or null, \
\"num_attachments\": number, \"body_file\": string or null, \"confidence\": \"low\" | \"medium\" | \"high\"}}]}}\n\
Use {{\"chats\": []}} when the segment holds no conversation.\n\n\
=== PREVIOUS (end of segment {prev_id}) ===\n{previous}\n\n\
=== CURRENT (segment {id}) ===\n{text}\n\n\
=== NEXT (start of segment {next_id}) ===\n{next}\n",
        prev_id = current.id.saturating_sub(1),
        id = current.id,
        text = current.text,
        next_id = current.id + 1,
    )
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn participant_from_value(item: &Value) -> Option<Participant> {
    let participant = match item {
        Value::String(raw) => parse_participant_line(raw)?,
        Value::Object(_) => Participant {
            id: string_field(item, &["id", "phone", "number"]),
            name: string_field(item, &["name", "display_name"]),
            is_owner: item
                .get("is_owner")
                .or_else(|| item.get("owner"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        _ => return None,
    };
    participant.is_usable().then_some(participant)
}

fn candidate_from_value(item: &Value, segment_id: u32) -> Option<ChatCandidate> {
    if !item.is_object() {
        return None;
    }
    let participants: Vec<Participant> = item
        .get("participants")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(participant_from_value).collect())
        .unwrap_or_default();
    let kind = string_field(item, &["type", "kind", "chat_type"])
        .and_then(|raw| ChatKind::parse(&raw))
        .unwrap_or_else(|| ChatKind::from_participant_count(participants.len()));
    let confidence = string_field(item, &["confidence"])
        .and_then(|raw| Confidence::parse(&raw))
        .unwrap_or_default();

    let mut candidate = ChatCandidate::new(kind, segment_id, confidence);
    candidate.identifier = string_field(item, &["identifier", "id"]);
    candidate.account = string_field(item, &["account"]);
    candidate.participants = participants;
    candidate.metadata = ChatMetadata {
        start_time: string_field(item, &["start_time"]),
        last_activity: string_field(item, &["last_activity"]),
        num_attachments: match item.get("num_attachments") {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        },
        body_file: string_field(item, &["body_file"]),
    };
    candidate.has_signal().then_some(candidate)
}

/// Candidates in a model reply. Unparseable replies and entries with no signal are dropped.
pub fn parse_candidates(reply: &str, segment_id: u32) -> Vec<ChatCandidate> {
    structured::extract_list(reply, "chats")
        .iter()
        .filter_map(|item| candidate_from_value(item, segment_id))
        .collect()
}

/// Asks the model about each segment with the neighbouring text attached on both sides.
pub struct WindowedLlmDetector<'a> {
    gateway: &'a dyn ModelGateway,
    overlap_chars: usize,
    delay: Duration,
}

impl<'a> WindowedLlmDetector<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, overlap_chars: usize, delay: Duration) -> Self {
        Self {
            gateway,
            overlap_chars,
            delay,
        }
    }

    pub fn prompt_for(&self, segments: &[Segment], idx: usize) -> String {
        let previous = idx
            .checked_sub(1)
            .and_then(|i| segments.get(i))
            .map(|s| tail_chars(&s.text, self.overlap_chars));
        let next = segments
            .get(idx + 1)
            .map(|s| head_chars(&s.text, self.overlap_chars));
        window_prompt(previous, &segments[idx], next)
    }
}

impl ChatDetector for WindowedLlmDetector<'_> {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn detect(
        &self,
        segments: &[Segment],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> Result<Vec<ChatCandidate>> {
        let mut out = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if idx > 0 && !self.delay.is_zero() && !cancel.sleep(self.delay) {
                break;
            }
            sink.log(&format!(
                "scanning segment {}/{} for conversations",
                segment.id,
                segments.len()
            ));
            let request = CompletionRequest::text(
                self.prompt_for(segments, idx),
                DETECTION_MAX_TOKENS,
                DETECTION_TEMPERATURE,
            );
            match self.gateway.complete(&request) {
                Ok(reply) => {
                    let found = parse_candidates(&reply, segment.id);
                    if found.is_empty() && structured::extract_json(&reply).is_none() {
                        log::warn!("segment {}: detection reply was not JSON; skipped", segment.id);
                    }
                    out.extend(found);
                }
                Err(err) => {
                    log::warn!("segment {}: chat detection failed: {err:#}", segment.id);
                    sink.log(&format!("segment {}: chat detection failed", segment.id));
                }
            }
            sink.progress(window.at(idx + 1, segments.len()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensic::progress::NoProgress;
    use crate::provider::testing::ScriptedGateway;

    const HEADER: &str = "Start Time: 03/02/2024 10:15:00\n\
Last Activity: 05/02/2024 22:01:13\n\
Account: +393331112222\n\
Participants:\n\
+393331112222 Mario Rossi (owner)\n\
+393334445555 Anna Bianchi\n\
Identifier: 3f2a9c8b7d6e5f40\n\
Number of attachments: 4\n\
Body file: chat-12.txt\n";

    fn segment(id: u32, text: &str) -> Segment {
        Segment {
            id,
            page_range: (id, id),
            pages: vec![id],
            text: text.to_string(),
            char_count: text.chars().count(),
            media_refs: Vec::new(),
            fingerprint: format!("fp{id}"),
        }
    }

    #[test]
    fn two_of_three_markers_open_a_chat() {
        assert_eq!(header_marker_count(HEADER), 3);
        assert_eq!(
            header_marker_count("Start Time: 1/1/2024\nParticipants:\nA\n"),
            2
        );
        assert_eq!(header_marker_count("Identifier: 3f2a9c8b7d6e5f40 only"), 1);
        assert_eq!(header_marker_count("Identifier: short"), 0);
    }

    #[test]
    fn header_metadata_is_extracted() {
        let chat = parse_header(HEADER, 4, Confidence::High);
        assert_eq!(chat.identifier.as_deref(), Some("3f2a9c8b7d6e5f40"));
        assert_eq!(chat.account.as_deref(), Some("+393331112222"));
        assert_eq!(chat.metadata.start_time.as_deref(), Some("03/02/2024 10:15:00"));
        assert_eq!(chat.metadata.num_attachments, 4);
        assert_eq!(chat.metadata.body_file.as_deref(), Some("chat-12.txt"));
        assert_eq!(chat.kind, ChatKind::OneToOne);
        assert_eq!(chat.participants.len(), 2);
        assert!(chat.participants[0].is_owner);
        assert_eq!(chat.participants[0].name.as_deref(), Some("Mario Rossi"));
        assert_eq!(chat.participants[1].id.as_deref(), Some("+393334445555"));
        assert!(!chat.participants[1].is_owner);
    }

    #[test]
    fn pattern_detector_accumulates_following_segments() {
        let segments = vec![
            segment(1, "cover page"),
            segment(2, HEADER),
            segment(3, "10:16 Anna: hi"),
            segment(4, "Start Time: 7/2/2024\nParticipants:\nwxid_abc123 Leo\nwxid_def456 Ada\nwxid_ghi789 Bo\n"),
            segment(5, "more group talk"),
        ];
        let found = PatternDetector
            .detect(&segments, &CancelToken::new(), &NoProgress, ProgressWindow::default())
            .expect("detect");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].segment_ids, vec![2, 3]);
        assert_eq!(found[0].confidence, Confidence::High);
        assert_eq!(found[1].segment_ids, vec![4, 5]);
        assert_eq!(found[1].kind, ChatKind::Group);
        assert_eq!(found[1].confidence, Confidence::Medium);
    }

    #[test]
    fn fallback_hint_fires_on_sparse_detection() {
        assert!(fallback_hint(1, 11).is_some());
        assert!(fallback_hint(1, 10).is_none());
        assert!(fallback_hint(2, 50).is_none());
    }

    #[test]
    fn window_prompt_carries_both_neighbours() {
        let segments = vec![
            segment(1, &format!("{}TAIL-OF-ONE", "a".repeat(50))),
            segment(2, "middle"),
            segment(3, &format!("HEAD-OF-THREE{}", "b".repeat(50))),
        ];
        let gateway = ScriptedGateway::constant("{\"chats\": []}");
        let detector = WindowedLlmDetector::new(&gateway, 11, Duration::ZERO);
        let prompt = detector.prompt_for(&segments, 1);
        assert!(prompt.contains("TAIL-OF-ONE"));
        assert!(!prompt.contains("aTAIL-OF-ONE"));
        assert!(prompt.contains("HEAD-OF-THR"));
        assert!(!prompt.contains("HEAD-OF-THREE"));
        assert!(prompt.contains("=== CURRENT (segment 2) ===\nmiddle"));

        let first = detector.prompt_for(&segments, 0);
        assert!(first.contains("(start of export)"));
    }

    #[test]
    fn llm_detector_parses_candidates_and_skips_bad_replies() {
        let segments = vec![segment(1, "one"), segment(2, "two"), segment(3, "three")];
        let gateway = ScriptedGateway::sequence(vec![
            Ok(r#"```json
{"chats": [{"type": "group", "identifier": "ABC123", "participants": [{"id": "+391", "name": "A"}, "+39 333 444 5555 B"], "confidence": "high", "num_attachments": "2"}]}
```"#),
            Ok("I could not find anything useful"),
            Err("connection reset"),
        ]);
        let detector = WindowedLlmDetector::new(&gateway, 100, Duration::ZERO);
        let found = detector
            .detect(&segments, &CancelToken::new(), &NoProgress, ProgressWindow::default())
            .expect("detect");
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(found.len(), 1);
        let chat = &found[0];
        assert_eq!(chat.kind, ChatKind::Group);
        assert_eq!(chat.identifier.as_deref(), Some("ABC123"));
        assert_eq!(chat.confidence, Confidence::High);
        assert_eq!(chat.metadata.num_attachments, 2);
        assert_eq!(chat.participants[1].id.as_deref(), Some("+39 333 444 5555"));
        assert_eq!(chat.participants[1].name.as_deref(), Some("B"));
        assert_eq!(chat.segment_ids, vec![1]);
    }

    #[test]
    fn entries_without_signal_are_dropped() {
        let reply = r#"{"chats": [{"type": "group", "participants": [{"id": "", "name": " "}]}, "junk"]}"#;
        assert!(parse_candidates(reply, 1).is_empty());
        assert!(parse_candidates("{ broken", 1).is_empty());
    }

    #[test]
    fn missing_confidence_defaults_to_low() {
        let found = parse_candidates(r#"{"chats": [{"participants": [{"name": "Ada"}]}]}"#, 7);
        assert_eq!(found[0].confidence, Confidence::Low);
        assert_eq!(found[0].kind, ChatKind::OneToOne);
        assert_eq!(found[0].detected_in_segment, 7);
    }
}
