//! Conversation reconstruction: boundary detection, deduplication and per-chat reports.

pub mod dedup;
pub mod detect;
pub mod report;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[serde(alias = "1v1", alias = "individual", alias = "one-to-one")]
    OneToOne,
    Group,
}

impl ChatKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "one_to_one" | "one-to-one" | "1v1" | "1:1" | "individual" | "private" => {
                Some(Self::OneToOne)
            }
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    /// More than two participants makes a group.
    pub fn from_participant_count(count: usize) -> Self {
        if count > 2 { Self::Group } else { Self::OneToOne }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OneToOne => "one-to-one",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "mid" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Participant {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default, alias = "owner")]
    pub is_owner: bool,
}

/// Lowercased with all whitespace removed; the form every equivalence test compares.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

impl Participant {
    /// Usable in equivalence tests only when id or name is present.
    pub fn is_usable(&self) -> bool {
        non_blank(self.id.as_deref()).is_some() || non_blank(self.name.as_deref()).is_some()
    }

    pub fn normalized_id(&self) -> Option<String> {
        non_blank(self.id.as_deref()).map(normalize_key)
    }

    pub fn normalized_key(&self) -> Option<String> {
        non_blank(self.id.as_deref())
            .or_else(|| non_blank(self.name.as_deref()))
            .map(normalize_key)
    }

    pub fn label(&self) -> &str {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.id.as_deref()))
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatMetadata {
    pub start_time: Option<String>,
    pub last_activity: Option<String>,
    pub num_attachments: u32,
    pub body_file: Option<String>,
}

/// One sighting of a conversation in one segment, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatCandidate {
    pub kind: ChatKind,
    pub identifier: Option<String>,
    pub account: Option<String>,
    pub participants: Vec<Participant>,
    pub metadata: ChatMetadata,
    pub detected_in_segment: u32,
    /// Always contains `detected_in_segment`; the pattern strategy adds the segments
    /// that follow a header.
    pub segment_ids: Vec<u32>,
    pub confidence: Confidence,
}

impl ChatCandidate {
    pub fn new(kind: ChatKind, detected_in_segment: u32, confidence: Confidence) -> Self {
        Self {
            kind,
            identifier: None,
            account: None,
            participants: Vec::new(),
            metadata: ChatMetadata::default(),
            detected_in_segment,
            segment_ids: vec![detected_in_segment],
            confidence,
        }
    }

    pub fn normalized_identifier(&self) -> Option<String> {
        non_blank(self.identifier.as_deref()).map(normalize_key)
    }

    /// A candidate with neither identifier nor usable participant carries no signal.
    pub fn has_signal(&self) -> bool {
        self.normalized_identifier().is_some()
            || self.participants.iter().any(Participant::is_usable)
    }
}

/// Canonical conversation after deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub kind: ChatKind,
    pub identifier: Option<String>,
    pub account: Option<String>,
    pub participants: Vec<Participant>,
    pub metadata: ChatMetadata,
    pub segment_ids: Vec<u32>,
    pub confidence: Confidence,
}

impl Chat {
    pub fn display_name(&self) -> String {
        match self.kind {
            ChatKind::OneToOne => self
                .participants
                .iter()
                .find(|p| !p.is_owner && p.is_usable())
                .or_else(|| self.participants.iter().find(|p| p.is_usable()))
                .map(|p| p.label().to_string())
                .or_else(|| non_blank(self.account.as_deref()).map(str::to_string))
                .unwrap_or_else(|| "One-to-one chat".to_string()),
            ChatKind::Group => {
                if self.participants.is_empty() {
                    return format!(
                        "Group {}",
                        non_blank(self.account.as_deref()).unwrap_or("unknown")
                    );
                }
                let names: Vec<&str> = self
                    .participants
                    .iter()
                    .take(3)
                    .map(Participant::label)
                    .collect();
                let extra = self.participants.len().saturating_sub(3);
                if extra > 0 {
                    format!("Group with {}, +{extra} more", names.join(", "))
                } else {
                    format!("Group with {}", names.join(", "))
                }
            }
        }
    }
}
