use super::{Chat, ChatCandidate, ChatKind, Participant};
use crate::forensic::config::DedupSettings;
use std::collections::HashSet;

/// Which rule merged a candidate into an existing chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Identifier,
    IdentifierIsParticipant,
    ParticipantOverlap,
    OneToOnePartner,
    GroupSubset,
}

const RULES: [MatchRule; 5] = [
    MatchRule::Identifier,
    MatchRule::IdentifierIsParticipant,
    MatchRule::ParticipantOverlap,
    MatchRule::OneToOnePartner,
    MatchRule::GroupSubset,
];

fn id_set(participants: &[Participant]) -> HashSet<String> {
    participants.iter().filter_map(Participant::normalized_id).collect()
}

fn partner_key(chat: &ChatCandidate) -> Option<String> {
    chat.participants
        .iter()
        .filter(|p| p.is_usable())
        .find(|p| !p.is_owner)
        .and_then(Participant::normalized_key)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn identifier_in_participants(holder: &ChatCandidate, other: &ChatCandidate) -> bool {
    holder
        .normalized_identifier()
        .is_some_and(|ident| id_set(&other.participants).contains(&ident))
}

fn group_subset(with_id: &ChatCandidate, without_id: &ChatCandidate, threshold: f64) -> bool {
    let small = id_set(&without_id.participants);
    if small.is_empty() {
        return false;
    }
    let large = id_set(&with_id.participants);
    small.intersection(&large).count() as f64 / small.len() as f64 >= threshold
}

/// Tests one rule between an accumulated chat and a new candidate.
pub fn rule_matches(
    rule: MatchRule,
    a: &ChatCandidate,
    b: &ChatCandidate,
    settings: &DedupSettings,
) -> bool {
    match rule {
        MatchRule::Identifier => match (a.normalized_identifier(), b.normalized_identifier()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        MatchRule::IdentifierIsParticipant => {
            identifier_in_participants(a, b) || identifier_in_participants(b, a)
        }
        MatchRule::ParticipantOverlap => {
            let (x, y) = (id_set(&a.participants), id_set(&b.participants));
            !x.is_empty() && !y.is_empty() && jaccard(&x, &y) > settings.jaccard_threshold
        }
        MatchRule::OneToOnePartner => {
            a.kind == ChatKind::OneToOne
                && b.kind == ChatKind::OneToOne
                && matches!((partner_key(a), partner_key(b)), (Some(x), Some(y)) if x == y)
        }
        MatchRule::GroupSubset => {
            if a.kind != ChatKind::Group || b.kind != ChatKind::Group {
                return false;
            }
            match (a.normalized_identifier(), b.normalized_identifier()) {
                (Some(_), None) => group_subset(a, b, settings.subset_threshold),
                (None, Some(_)) => group_subset(b, a, settings.subset_threshold),
                _ => false,
            }
        }
    }
}

/// First accumulated chat the candidate belongs to. Rules are tried strongest first across all
/// chats, so an identifier match always beats a weaker match on an earlier chat.
pub fn find_match(
    chats: &[ChatCandidate],
    candidate: &ChatCandidate,
    settings: &DedupSettings,
) -> Option<(usize, MatchRule)> {
    RULES.iter().find_map(|&rule| {
        chats
            .iter()
            .position(|chat| rule_matches(rule, chat, candidate, settings))
            .map(|idx| (idx, rule))
    })
}

fn merge_into(existing: &mut ChatCandidate, candidate: ChatCandidate) {
    let mut segment_ids = std::mem::take(&mut existing.segment_ids);
    segment_ids.extend(candidate.segment_ids.iter().copied());
    if candidate.confidence > existing.confidence {
        *existing = candidate;
    }
    existing.segment_ids = segment_ids;
}

/// Collapses per-segment sightings into canonical chats, numbered in first-seen order.
pub fn deduplicate(candidates: Vec<ChatCandidate>, settings: &DedupSettings) -> Vec<Chat> {
    let mut chats: Vec<ChatCandidate> = Vec::new();
    for candidate in candidates {
        if !candidate.has_signal() {
            log::debug!(
                "segment {}: dropping chat sighting without identifier or participants",
                candidate.detected_in_segment
            );
            continue;
        }
        match find_match(&chats, &candidate, settings) {
            Some((idx, rule)) => {
                log::debug!(
                    "segment {}: merged into chat {} ({rule:?})",
                    candidate.detected_in_segment,
                    idx + 1
                );
                merge_into(&mut chats[idx], candidate);
            }
            None => chats.push(candidate),
        }
    }

    chats
        .into_iter()
        .enumerate()
        .map(|(idx, mut chat)| {
            chat.segment_ids.sort_unstable();
            chat.segment_ids.dedup();
            Chat {
                chat_id: format!("chat_{:03}", idx + 1),
                kind: chat.kind,
                identifier: chat.identifier,
                account: chat.account,
                participants: chat.participants,
                metadata: chat.metadata,
                segment_ids: chat.segment_ids,
                confidence: chat.confidence,
            }
        })
        .collect()
}
